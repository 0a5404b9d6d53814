//! Store error type.

use mondrian_protocol::{JobId, JobStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("advisor not found: {0}")]
    AdvisorNotFound(String),

    #[error("job {0} is terminal and accepts no further mutations")]
    TerminalJob(JobId),

    #[error("illegal status transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("mode_used already set for job {0}; the dispatcher writes it exactly once")]
    ModeAlreadySet(JobId),

    #[error("unsupported store URL: {0}")]
    UnsupportedUrl(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),
}
