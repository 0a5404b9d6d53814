//! Strategy dispatcher: mode resolution, fallback, and two-pass
//! orchestration over the model callable.
//!
//! The dispatcher holds no per-job state. It resolves a requested mode
//! against availability predicates, walks the fallback chain, and runs the
//! resolved strategy: one pass for baseline/LoRA, extract-retrieve-compare
//! for the RAG family.

mod adapters;
mod error;
mod model;
mod parse;
mod prompts;
mod strategy;

pub use adapters::{AdapterCache, AdapterError, AdapterLoader, FsAdapterLoader};
pub use error::StrategyError;
pub use model::{
    HttpModelBackend, ModelCallable, ModelError, ModelGate, ModelHandle, ThinkingSink,
};
pub use parse::{parse_analysis, ModelAnalysis};
pub use prompts::{augmented_prompt, extraction_prompt, persona_prompt};
pub use strategy::{
    AnalysisOutcome, AnalysisRequest, Dispatcher, ProfileStore, StrategyMetadata,
};
