//! Job persistence: atomic create/read/mutate plus FIFO claiming.
//!
//! The `record` column holds the full serialized [`JobRecord`]; `status`,
//! `created_at`, and `last_activity` are mirrored into their own columns so
//! the claim, list, and reaper queries stay in SQL.

use chrono::{DateTime, Utc};
use mondrian_protocol::{JobId, JobPatch, JobRecord, JobStatus};
use sqlx::Row;
use tracing::debug;

use crate::error::StoreError;
use crate::store::Store;

/// Filter for [`Store::list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
}

impl Store {
    /// Atomic insert with status `queued`, percentage 0.
    pub async fn create_job(&self, record: &JobRecord) -> Result<JobId, StoreError> {
        let serialized = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, created_at, last_activity, record)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.status.as_str())
        .bind(record.created_at.to_rfc3339())
        .bind(record.last_activity.to_rfc3339())
        .bind(serialized)
        .execute(self.pool())
        .await?;
        debug!("Created job {}", record.id);
        Ok(record.id)
    }

    /// Full record or not-found.
    pub async fn get_job(&self, id: JobId) -> Result<JobRecord, StoreError> {
        let row = sqlx::query("SELECT record FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::JobNotFound(id))?;
        let record: JobRecord = serde_json::from_str(row.get::<String, _>(0).as_str())?;
        Ok(record)
    }

    /// Atomic read-modify-write.
    ///
    /// Rejects mutations of terminal records and illegal status transitions,
    /// enforces monotonic percentage via `max(new, last)`, refreshes
    /// `last_activity`, and appends an audit entry when status, phase, or the
    /// completed-advisor count changes. Returns the updated record.
    pub async fn mutate_job(&self, id: JobId, patch: JobPatch) -> Result<JobRecord, StoreError> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT record FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::JobNotFound(id))?;
        let record: JobRecord = serde_json::from_str(row.get::<String, _>(0).as_str())?;

        let updated = apply_patch(record, patch)?;
        let serialized = serde_json::to_string(&updated)?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, last_activity = ?, record = ?
            WHERE id = ?
            "#,
        )
        .bind(updated.status.as_str())
        .bind(updated.last_activity.to_rfc3339())
        .bind(serialized)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Atomically claim the oldest queued job for a worker.
    ///
    /// FIFO by `created_at`; the claim transitions the job to
    /// `processing`/`image_processing` in the same transaction so two workers
    /// can never pick up the same job.
    pub async fn claim_next_queued(&self) -> Result<Option<JobRecord>, StoreError> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(
            r#"
            SELECT record FROM jobs
            WHERE status = 'queued'
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let record: JobRecord = serde_json::from_str(row.get::<String, _>(0).as_str())?;
        let id = record.id;

        let patch = JobPatch {
            status: Some(JobStatus::Processing),
            phase: Some(mondrian_protocol::JobPhase::ImageProcessing),
            started_at: Some(Utc::now()),
            ..JobPatch::default()
        };
        let updated = apply_patch(record, patch)?;
        let serialized = serde_json::to_string(&updated)?;

        let claimed = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, last_activity = ?, record = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(updated.status.as_str())
        .bind(updated.last_activity.to_rfc3339())
        .bind(&serialized)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if claimed == 0 {
            // Another worker won the race.
            return Ok(None);
        }
        debug!("Claimed job {}", id);
        Ok(Some(updated))
    }

    /// Most-recent-first listing.
    pub async fn list_jobs(
        &self,
        limit: usize,
        filter: JobFilter,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let rows = match filter.status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT record FROM jobs
                    WHERE status = ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT record FROM jobs
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(limit as i64)
                .fetch_all(self.pool())
                .await?
            }
        };

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(serde_json::from_str(row.get::<String, _>(0).as_str())?);
        }
        Ok(jobs)
    }

    /// Non-terminal jobs whose `last_activity` is older than `cutoff`.
    /// Backs the supervisor's reaper.
    pub async fn list_stale_jobs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM jobs
            WHERE status NOT IN ('done', 'error') AND last_activity < ?
            ORDER BY last_activity ASC
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(self.pool())
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(serde_json::from_str(row.get::<String, _>(0).as_str())?);
        }
        Ok(jobs)
    }

    /// Count of jobs in a given status (queue depth, active workers).
    pub async fn count_jobs(&self, status: JobStatus) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.pool())
            .await?;
        Ok(count as u64)
    }
}

/// Apply a patch to a record, enforcing the job invariants.
///
/// Pure so the mutate and claim paths share one implementation.
fn apply_patch(mut record: JobRecord, patch: JobPatch) -> Result<JobRecord, StoreError> {
    if record.is_terminal() {
        return Err(StoreError::TerminalJob(record.id));
    }

    if let Some(next) = patch.status {
        if next != record.status && !record.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: record.id,
                from: record.status,
                to: next,
            });
        }
    }

    if let Some(mode) = patch.mode_used {
        match record.mode_used {
            Some(existing) if existing != mode => {
                return Err(StoreError::ModeAlreadySet(record.id));
            }
            _ => record.mode_used = Some(mode),
        }
    }

    let old_status = record.status;
    let old_phase = record.phase;
    let old_advisor = record.current_advisor;

    if let Some(status) = patch.status {
        record.status = status;
    }
    if let Some(phase) = patch.phase {
        record.phase = phase;
    }
    if let Some(pct) = patch.percentage {
        // Monotonic: max(new, last).
        record.percentage = record.percentage.max(pct.min(100));
    }
    if let Some(step) = patch.current_step {
        record.current_step = Some(step);
    }
    if let Some(thinking) = patch.last_thinking {
        record.last_thinking = Some(thinking);
    }
    if let Some(current) = patch.current_advisor {
        record.current_advisor = current;
    }
    if let Some(total) = patch.total_advisors {
        record.total_advisors = total;
    }
    if let Some(started) = patch.started_at {
        record.started_at = Some(started);
    }
    if let Some(completed) = patch.completed_at {
        record.completed_at = Some(completed);
    }
    if let Some(message) = patch.error_message {
        record.error_message = Some(message);
    }
    if let Some(kind) = patch.error_kind {
        record.error_kind = Some(kind);
    }
    if let Some(output) = patch.rendered_output {
        record.rendered_output = Some(output);
    }
    if let Some((advisor_id, value)) = patch.advisor_output {
        record.advisor_outputs.insert(advisor_id, value);
    }

    record.last_activity = Utc::now();

    if record.status != old_status
        || record.phase != old_phase
        || record.current_advisor != old_advisor
    {
        record.status_history.push(mondrian_protocol::StatusChange {
            timestamp: record.last_activity,
            status: record.status,
            phase: record.phase,
            current_advisor: record.current_advisor,
        });
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mondrian_protocol::{AnalysisMode, ErrorKind, JobPhase};

    fn sample_job() -> JobRecord {
        JobRecord::new(
            "uploads/test.jpg".to_string(),
            "ansel".to_string(),
            AnalysisMode::Baseline,
        )
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = Store::open_in_memory().await.unwrap();
        let record = sample_job();
        let id = store.create_job(&record).await.unwrap();

        let fetched = store.get_job(id).await.unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.percentage, 0);
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let store = Store::open_in_memory().await.unwrap();
        let err = store.get_job(JobId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn percentage_never_decreases() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.create_job(&sample_job()).await.unwrap();

        let updated = store
            .mutate_job(id, JobPatch::default().with_percentage(40))
            .await
            .unwrap();
        assert_eq!(updated.percentage, 40);

        // A lower value is clamped, not applied.
        let updated = store
            .mutate_job(id, JobPatch::default().with_percentage(10))
            .await
            .unwrap();
        assert_eq!(updated.percentage, 40);

        let updated = store
            .mutate_job(id, JobPatch::default().with_percentage(55))
            .await
            .unwrap();
        assert_eq!(updated.percentage, 55);
    }

    #[tokio::test]
    async fn mutation_refreshes_last_activity() {
        let store = Store::open_in_memory().await.unwrap();
        let record = sample_job();
        let before = record.last_activity;
        let id = store.create_job(&record).await.unwrap();

        let updated = store
            .mutate_job(id, JobPatch::thinking("examining highlights"))
            .await
            .unwrap();
        assert!(updated.last_activity >= before);
        assert_eq!(
            updated.last_thinking.as_deref(),
            Some("examining highlights")
        );
    }

    #[tokio::test]
    async fn audit_history_tracks_status_phase_advisor() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.create_job(&sample_job()).await.unwrap();

        let updated = store
            .mutate_job(
                id,
                JobPatch::status(JobStatus::Processing, JobPhase::ImageProcessing),
            )
            .await
            .unwrap();
        assert_eq!(updated.status_history.len(), 1);

        // Thinking-only updates leave the history alone.
        let updated = store
            .mutate_job(id, JobPatch::thinking("hmm"))
            .await
            .unwrap();
        assert_eq!(updated.status_history.len(), 1);

        let updated = store
            .mutate_job(
                id,
                JobPatch {
                    current_advisor: Some(1),
                    ..JobPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status_history.len(), 2);
        assert_eq!(updated.status_history[1].current_advisor, 1);
    }

    #[tokio::test]
    async fn terminal_jobs_reject_mutations() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.create_job(&sample_job()).await.unwrap();

        store
            .mutate_job(id, JobPatch::failure(ErrorKind::Internal, "boom"))
            .await
            .unwrap();

        let err = store
            .mutate_job(id, JobPatch::thinking("too late"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalJob(_)));
    }

    #[tokio::test]
    async fn illegal_transitions_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.create_job(&sample_job()).await.unwrap();

        let err = store
            .mutate_job(
                id,
                JobPatch::status(JobStatus::Finalizing, JobPhase::Finalizing),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn mode_used_is_write_once() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.create_job(&sample_job()).await.unwrap();

        store
            .mutate_job(
                id,
                JobPatch {
                    mode_used: Some(AnalysisMode::Rag),
                    ..JobPatch::default()
                },
            )
            .await
            .unwrap();

        // Same value is idempotent.
        store
            .mutate_job(
                id,
                JobPatch {
                    mode_used: Some(AnalysisMode::Rag),
                    ..JobPatch::default()
                },
            )
            .await
            .unwrap();

        let err = store
            .mutate_job(
                id,
                JobPatch {
                    mode_used: Some(AnalysisMode::Baseline),
                    ..JobPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ModeAlreadySet(_)));
    }

    #[tokio::test]
    async fn claim_is_fifo_and_exclusive() {
        let store = Store::open_in_memory().await.unwrap();

        let mut first = sample_job();
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = sample_job();
        store.create_job(&first).await.unwrap();
        store.create_job(&second).await.unwrap();

        let claimed = store.claim_next_queued().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(claimed.started_at.is_some());

        let claimed = store.claim_next_queued().await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(store.claim_next_queued().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_jobs_most_recent_first() {
        let store = Store::open_in_memory().await.unwrap();
        let mut old = sample_job();
        old.created_at = Utc::now() - chrono::Duration::seconds(60);
        let new = sample_job();
        store.create_job(&old).await.unwrap();
        store.create_job(&new).await.unwrap();

        let jobs = store.list_jobs(10, JobFilter::default()).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, new.id);
        assert_eq!(jobs[1].id, old.id);

        let queued = store
            .list_jobs(
                10,
                JobFilter {
                    status: Some(JobStatus::Queued),
                },
            )
            .await
            .unwrap();
        assert_eq!(queued.len(), 2);
    }

    #[tokio::test]
    async fn stale_listing_skips_terminal_jobs() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.create_job(&sample_job()).await.unwrap();

        // Nothing stale yet.
        let cutoff = Utc::now() - chrono::Duration::seconds(60);
        assert!(store.list_stale_jobs(cutoff).await.unwrap().is_empty());

        // Everything is stale against a future cutoff.
        let cutoff = Utc::now() + chrono::Duration::seconds(60);
        let stale = store.list_stale_jobs(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, id);

        // Terminal jobs are never reported.
        store
            .mutate_job(id, JobPatch::failure(ErrorKind::Timeout, "reaped"))
            .await
            .unwrap();
        assert!(store.list_stale_jobs(cutoff).await.unwrap().is_empty());
    }
}
