//! Job engine: persistent queue, state machine, worker pool, and the
//! per-job SSE bus.
//!
//! Jobs move `queued -> processing -> analyzing -> finalizing -> done`, with
//! `error` reachable from any non-terminal state. Every mutation goes through
//! the store and is published to subscribers in commit order.

mod bus;
mod engine;
mod labels;
mod render;

pub use bus::EventBus;
pub use engine::{EngineConfig, EngineError, JobEngine, JobSubmission};
pub use labels::{step_label, SUMMONING_VERBS};
pub use render::render_critique;
