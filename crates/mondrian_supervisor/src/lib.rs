//! Supervisor: starts dependent services in topological order, health-checks
//! them, restarts failures with bounded backoff, and reaps jobs that exceed
//! their wall-clock budget.

mod reaper;
mod spec;
mod supervisor;

pub use reaper::{reaper_loop, JobReaper, StoreReaper};
pub use spec::{ChildSpec, LimitsConfig, SpecError, SupervisorConfig};
pub use supervisor::{ChildState, ChildStatus, Supervisor, SupervisorSnapshot};
