//! Strategy error type, convertible to the job error taxonomy.

use mondrian_protocol::{AnalysisMode, ErrorKind};
use mondrian_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("mode {mode} unavailable for advisor {advisor}")]
    Unavailable {
        mode: AnalysisMode,
        advisor: String,
    },

    #[error("model call exceeded its budget")]
    ModelTimeout,

    #[error("model output did not match the expected schema after retry: {0}")]
    ParseError(String),

    #[error("retrieval failed and rag_lora cannot degrade: {0}")]
    RetrievalRequired(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl StrategyError {
    /// Tag for `job.error_kind` and API payloads.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrategyError::Unavailable { .. } => ErrorKind::Unavailable,
            StrategyError::ModelTimeout => ErrorKind::ModelTimeout,
            StrategyError::ParseError(_) => ErrorKind::ParseError,
            StrategyError::RetrievalRequired(_) => ErrorKind::RetrievalRequired,
            StrategyError::Store(_) | StrategyError::Internal(_) => ErrorKind::Internal,
        }
    }
}
