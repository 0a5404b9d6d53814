//! Canonical types for the Mondrian analysis pipeline.
//!
//! Every crate in the workspace speaks these types: job identifiers and
//! lifecycle enums, the eight-dimension profile model, the SSE event shapes,
//! and the deterministic progress function. Nothing here touches I/O.

pub mod defaults;
pub mod events;
pub mod job;
pub mod progress;
pub mod types;

// Re-export the canonical enums and records for convenience.
pub use events::{SseFrame, StreamEvent};
pub use job::{JobPatch, JobRecord, JobSnapshot, StatusChange};
pub use progress::percent_for;
pub use types::{
    Advisor,
    AdvisorSelector,
    AnalysisMode,
    Dimension,
    DimensionScore,
    DimensionalProfile,
    ErrorKind,
    JobId,
    JobIdError,
    JobPhase,
    JobStatus,
    ProfileMetadata,
    SelectorError,
};
