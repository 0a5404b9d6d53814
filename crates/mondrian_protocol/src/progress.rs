//! Deterministic progress computation.
//!
//! The percentage shown to clients is a pure function of
//! (status, phase, completed advisors, total advisors). Monotonicity is
//! enforced separately by the store's mutate path via `max(new, last)`.

use crate::types::{JobPhase, JobStatus};

/// Map a job's coarse position to a percentage.
///
/// Returns `None` for `error`: an errored job's percentage stays frozen at
/// its last observed value.
///
/// `current_advisor` counts *completed* advisors, which keeps the advisor
/// analysis band monotone: 10 at zero completed, 90 once all have finished.
pub fn percent_for(
    status: JobStatus,
    phase: JobPhase,
    current_advisor: u32,
    total_advisors: u32,
) -> Option<u8> {
    let pct = match (status, phase) {
        (JobStatus::Error, _) => return None,
        (JobStatus::Queued, _) => 0,
        (JobStatus::Processing, _) => 5,
        (JobStatus::Analyzing, JobPhase::AdvisorAnalysis) => {
            let total = total_advisors.max(1) as u64;
            let done = u64::from(current_advisor).min(total);
            10 + (80 * done / total) as u8
        }
        (JobStatus::Analyzing, _) => 10,
        (JobStatus::Finalizing, _) => 95,
        (JobStatus::Done, _) => 100,
    };
    Some(pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarse_states() {
        assert_eq!(
            percent_for(JobStatus::Queued, JobPhase::ImageProcessing, 0, 0),
            Some(0)
        );
        assert_eq!(
            percent_for(JobStatus::Processing, JobPhase::ImageProcessing, 0, 1),
            Some(5)
        );
        assert_eq!(
            percent_for(JobStatus::Analyzing, JobPhase::AdvisorPreparation, 0, 1),
            Some(10)
        );
        assert_eq!(
            percent_for(JobStatus::Finalizing, JobPhase::Finalizing, 1, 1),
            Some(95)
        );
        assert_eq!(percent_for(JobStatus::Done, JobPhase::Done, 1, 1), Some(100));
    }

    #[test]
    fn error_freezes_percentage() {
        assert_eq!(
            percent_for(JobStatus::Error, JobPhase::AdvisorAnalysis, 2, 3),
            None
        );
    }

    #[test]
    fn all_advisors_complete_is_ninety() {
        for n in 1..=16 {
            assert_eq!(
                percent_for(JobStatus::Analyzing, JobPhase::AdvisorAnalysis, n, n),
                Some(90)
            );
        }
    }

    #[test]
    fn advisor_band_floors() {
        // floor(80 * 1 / 3) = 26
        assert_eq!(
            percent_for(JobStatus::Analyzing, JobPhase::AdvisorAnalysis, 1, 3),
            Some(36)
        );
        assert_eq!(
            percent_for(JobStatus::Analyzing, JobPhase::AdvisorAnalysis, 2, 3),
            Some(63)
        );
        assert_eq!(
            percent_for(JobStatus::Analyzing, JobPhase::AdvisorAnalysis, 0, 3),
            Some(10)
        );
    }

    #[test]
    fn single_advisor_progress_sequence() {
        // The full trace for one advisor: 0, 5, 10, 90, 95, 100.
        let trace = [
            percent_for(JobStatus::Queued, JobPhase::ImageProcessing, 0, 1),
            percent_for(JobStatus::Processing, JobPhase::ImageProcessing, 0, 1),
            percent_for(JobStatus::Analyzing, JobPhase::AdvisorPreparation, 0, 1),
            percent_for(JobStatus::Analyzing, JobPhase::AdvisorAnalysis, 1, 1),
            percent_for(JobStatus::Finalizing, JobPhase::Finalizing, 1, 1),
            percent_for(JobStatus::Done, JobPhase::Done, 1, 1),
        ];
        assert_eq!(
            trace,
            [Some(0), Some(5), Some(10), Some(90), Some(95), Some(100)]
        );
    }

    #[test]
    fn completed_count_never_exceeds_total() {
        assert_eq!(
            percent_for(JobStatus::Analyzing, JobPhase::AdvisorAnalysis, 9, 3),
            Some(90)
        );
    }
}
