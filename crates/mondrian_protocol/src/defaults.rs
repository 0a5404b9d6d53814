//! Canonical default values shared across the pipeline.

/// State store URL (sqlite:PATH or sqlite::memory:)
pub const DEFAULT_STORE_URL: &str = "sqlite:mondrian.db";
/// HTTP bind address for the upload/stream API
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
/// Directory where uploaded originals land
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

/// SSE heartbeat cadence
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;
/// Per-subscriber buffered event capacity; oldest events drop on overflow
pub const SUBSCRIBER_BUFFER_EVENTS: usize = 64;

/// Worker pool degree; the model callable is a singleton resource
pub const DEFAULT_WORKER_COUNT: usize = 1;
/// Per-call model budget
pub const MODEL_CALL_TIMEOUT_SECS: u64 = 120;

/// Reaper cadence
pub const CLEANUP_INTERVAL_SECS: u64 = 60;
/// Wall-clock budget before a job is reaped
pub const JOB_TIMEOUT_SECS: i64 = 900;

/// Supervisor health poll cadence
pub const HEALTH_POLL_INTERVAL_SECS: u64 = 30;
/// Consecutive health failures before a child is unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;
/// Restart attempts within the rolling window before alert-and-hold
pub const MAX_RESTART_ATTEMPTS: u32 = 5;
/// Rolling window for counting restart attempts
pub const RESTART_WINDOW_SECS: i64 = 300;
/// Shutdown drain window for in-flight jobs
pub const DRAIN_WINDOW_SECS: u64 = 30;

/// Underperformance threshold k: a dimension underperforms iff
/// user < mean - k * std
pub const UNDERPERFORMANCE_THRESHOLD: f64 = 1.0;
/// Floor for the per-dimension population std, avoids zero divides
pub const STD_DEV_FLOOR: f64 = 0.1;
/// Cap on representatives returned by distribution retrieval
pub const MAX_REPRESENTATIVES: usize = 3;
/// Top-k for visual similarity
pub const VISUAL_TOP_K: usize = 3;
/// Minimum reference profiles for distribution analysis (and rag availability)
pub const MIN_REFERENCE_PROFILES: usize = 2;
