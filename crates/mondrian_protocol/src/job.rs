//! Job record, mutation patch, and client-facing snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{AnalysisMode, ErrorKind, JobId, JobPhase, JobStatus};

/// One entry of the in-record audit trail. Appended whenever status, phase,
/// or the completed-advisor count changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub timestamp: DateTime<Utc>,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub current_advisor: u32,
}

/// Full persistent job record.
///
/// Owned by the store; the engine mutates it exclusively through
/// [`JobPatch`]es so the monotonic-percentage and audit invariants hold in
/// one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Path or blob id of the uploaded image
    pub image_ref: String,
    /// Raw advisor field from the upload (id, comma list, `all`, `random`)
    pub advisor_spec: String,
    pub requested_mode: AnalysisMode,
    /// Set exactly once by the dispatcher, never re-written
    pub mode_used: Option<AnalysisMode>,
    pub status: JobStatus,
    pub phase: JobPhase,
    /// 0-100, monotonic non-decreasing
    pub percentage: u8,
    /// Whimsical step label, e.g. "Summoning Ansel Adams"
    pub current_step: Option<String>,
    /// Most recent model thinking text
    pub last_thinking: Option<String>,
    /// Completed advisors (not the one currently running)
    pub current_advisor: u32,
    pub total_advisors: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Combined rendered HTML critique
    pub rendered_output: Option<String>,
    /// Raw per-advisor result blobs, keyed by advisor id
    pub advisor_outputs: BTreeMap<String, serde_json::Value>,
    pub status_history: Vec<StatusChange>,
}

impl JobRecord {
    /// Fresh record for a newly accepted upload.
    pub fn new(image_ref: String, advisor_spec: String, requested_mode: AnalysisMode) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            image_ref,
            advisor_spec,
            requested_mode,
            mode_used: None,
            status: JobStatus::Queued,
            phase: JobPhase::ImageProcessing,
            percentage: 0,
            current_step: None,
            last_thinking: None,
            current_advisor: 0,
            total_advisors: 0,
            created_at: now,
            started_at: None,
            last_activity: now,
            completed_at: None,
            error_message: None,
            error_kind: None,
            rendered_output: None,
            advisor_outputs: BTreeMap::new(),
            status_history: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Client-facing snapshot carried by `status_update` events and the
    /// `/status/{id}` endpoint.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            status: self.status,
            phase: self.phase,
            percentage: self.percentage,
            current_step: self.current_step.clone(),
            llm_thinking: self.last_thinking.clone(),
            current_advisor: self.current_advisor,
            total_advisors: self.total_advisors,
            requested_mode: self.requested_mode,
            mode_used: self.mode_used,
            error_message: self.error_message.clone(),
            error_kind: self.error_kind,
            created_at: self.created_at,
            last_activity: self.last_activity,
            completed_at: self.completed_at,
        }
    }
}

/// Point-in-time view of a job, safe to hand to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub percentage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_thinking: Option<String>,
    pub current_advisor: u32,
    pub total_advisors: u32,
    pub requested_mode: AnalysisMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_used: Option<AnalysisMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Mutation applied to a job record through the store.
///
/// `None` fields are left untouched. The store rejects patches against
/// terminal records, clamps percentage to be non-decreasing, refreshes
/// `last_activity`, and appends to the audit history when status, phase, or
/// the completed-advisor count changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub phase: Option<JobPhase>,
    pub percentage: Option<u8>,
    pub current_step: Option<String>,
    pub last_thinking: Option<String>,
    pub current_advisor: Option<u32>,
    pub total_advisors: Option<u32>,
    pub mode_used: Option<AnalysisMode>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub rendered_output: Option<String>,
    /// Advisor result to merge into `advisor_outputs`
    pub advisor_output: Option<(String, serde_json::Value)>,
}

impl JobPatch {
    pub fn status(status: JobStatus, phase: JobPhase) -> Self {
        Self {
            status: Some(status),
            phase: Some(phase),
            ..Self::default()
        }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self {
            last_thinking: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error_kind: Some(kind),
            error_message: Some(message.into()),
            completed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn with_percentage(mut self, percentage: u8) -> Self {
        self.percentage = Some(percentage);
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    /// Does this patch touch any field the audit history tracks?
    pub fn changes_audited_fields(&self) -> bool {
        self.status.is_some() || self.phase.is_some() || self.current_advisor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_queued_at_zero() {
        let record = JobRecord::new(
            "uploads/img.jpg".to_string(),
            "ansel".to_string(),
            AnalysisMode::Baseline,
        );
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.percentage, 0);
        assert!(record.mode_used.is_none());
        assert!(!record.is_terminal());
    }

    #[test]
    fn snapshot_carries_thinking_text() {
        let mut record = JobRecord::new(
            "uploads/img.jpg".to_string(),
            "ansel".to_string(),
            AnalysisMode::Rag,
        );
        record.last_thinking = Some("studying tonal range".to_string());
        let snap = record.snapshot();
        assert_eq!(snap.llm_thinking.as_deref(), Some("studying tonal range"));
        assert_eq!(snap.requested_mode, AnalysisMode::Rag);
    }

    #[test]
    fn patch_audit_detection() {
        assert!(JobPatch::status(JobStatus::Processing, JobPhase::ImageProcessing)
            .changes_audited_fields());
        assert!(!JobPatch::thinking("pondering").changes_audited_fields());
    }
}
