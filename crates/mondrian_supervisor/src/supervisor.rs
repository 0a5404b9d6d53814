//! Child process lifecycle: dependency-ordered start, health polling,
//! restart with bounded exponential backoff, snapshot, and reverse-order
//! shutdown.

use anyhow::{Context, Result};
use mondrian_protocol::JobSnapshot;
use mondrian_store::{JobFilter, Store};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::spec::{ChildSpec, SupervisorConfig};

/// Backoff base for restart attempts: 2s, 4s, 8s, ...
const RESTART_BACKOFF_BASE_SECS: u64 = 2;
/// Backoff cap.
const RESTART_BACKOFF_MAX_SECS: u64 = 60;
/// How long a child may take to become healthy on first start.
const STARTUP_TIMEOUT_SECS: u64 = 60;
/// Poll cadence while waiting for a dependency to come up.
const STARTUP_POLL_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildState {
    /// Spawned, not yet confirmed healthy
    Starting,
    Healthy,
    /// Consecutive health failures reached the threshold
    Unhealthy,
    /// Restart budget exhausted; held until manual reset
    Failed,
    Stopped,
}

struct ChildRuntime {
    spec: ChildSpec,
    state: ChildState,
    process: Option<Child>,
    consecutive_failures: u32,
    /// Restart instants inside the rolling window
    restarts: Vec<Instant>,
}

impl ChildRuntime {
    fn new(spec: ChildSpec) -> Self {
        Self {
            spec,
            state: ChildState::Stopped,
            process: None,
            consecutive_failures: 0,
            restarts: Vec::new(),
        }
    }
}

/// Read-only view of one child for the snapshot endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChildStatus {
    pub name: String,
    pub state: ChildState,
    pub pid: Option<u32>,
    pub consecutive_failures: u32,
    pub restarts_in_window: usize,
}

/// Read-only view of the whole supervisor: all children plus the most
/// recent jobs when a store is attached.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorSnapshot {
    pub children: Vec<ChildStatus>,
    pub recent_jobs: Vec<JobSnapshot>,
}

/// How many jobs the snapshot reports.
const SNAPSHOT_JOB_LIMIT: usize = 20;

pub struct Supervisor {
    config: SupervisorConfig,
    children: Mutex<HashMap<String, ChildRuntime>>,
    start_order: Vec<String>,
    http: reqwest::Client,
    store: Option<Store>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        let start_order = config.start_order().context("invalid child graph")?;
        let children = config
            .children
            .iter()
            .map(|spec| (spec.name.clone(), ChildRuntime::new(spec.clone())))
            .collect();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to build health client")?;
        Ok(Self {
            config,
            children: Mutex::new(children),
            start_order,
            http,
            store: None,
        })
    }

    /// Attach a store so snapshots include recent jobs.
    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Start every child in dependency order. A child is spawned only after
    /// all of its dependencies report healthy.
    pub async fn start_all(&self) -> Result<()> {
        for name in &self.start_order.clone() {
            let spec = self
                .config
                .child(name)
                .expect("start order only contains known children")
                .clone();
            for dep in &spec.depends_on {
                self.wait_healthy(dep).await?;
            }
            self.spawn_child(name).await?;
            self.wait_healthy(name).await?;
        }
        info!("All {} children healthy", self.start_order.len());
        Ok(())
    }

    async fn spawn_child(&self, name: &str) -> Result<()> {
        let mut children = self.children.lock().await;
        let runtime = children.get_mut(name).expect("known child");
        let spec = &runtime.spec;

        info!("Starting child {}: {} {:?}", name, spec.command, spec.args);
        let process = Command::new(&spec.command)
            .args(&spec.args)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn child {name}"))?;
        runtime.process = Some(process);
        runtime.state = ChildState::Starting;
        runtime.consecutive_failures = 0;
        Ok(())
    }

    async fn wait_healthy(&self, name: &str) -> Result<()> {
        let health_url = {
            let children = self.children.lock().await;
            children.get(name).expect("known child").spec.health_url.clone()
        };
        let deadline = Instant::now() + Duration::from_secs(STARTUP_TIMEOUT_SECS);
        loop {
            if self.probe(&health_url).await {
                let mut children = self.children.lock().await;
                let runtime = children.get_mut(name).expect("known child");
                runtime.state = ChildState::Healthy;
                runtime.consecutive_failures = 0;
                debug!("Child {} healthy", name);
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!("child {name} did not become healthy in time");
            }
            tokio::time::sleep(Duration::from_millis(STARTUP_POLL_MS)).await;
        }
    }

    async fn probe(&self, health_url: &str) -> bool {
        match self.http.get(health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    // ------------------------------------------------------------------
    // Health loop
    // ------------------------------------------------------------------

    /// Poll children on the configured interval until `shutdown` flips.
    pub async fn health_loop(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.limits.health_interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_children_once().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One health pass over every running child. Public so tests (and the
    /// CLI's `--once` mode) can drive it without the timer.
    pub async fn poll_children_once(&self) {
        let names: Vec<String> = {
            let children = self.children.lock().await;
            children.keys().cloned().collect()
        };
        for name in names {
            self.poll_child(&name).await;
        }
    }

    async fn poll_child(&self, name: &str) {
        let (health_url, state) = {
            let children = self.children.lock().await;
            let runtime = children.get(name).expect("known child");
            (runtime.spec.health_url.clone(), runtime.state)
        };
        if matches!(state, ChildState::Failed | ChildState::Stopped) {
            return;
        }

        let healthy = self.probe(&health_url).await;
        let mut restart_needed = false;
        {
            let mut children = self.children.lock().await;
            let runtime = children.get_mut(name).expect("known child");
            if healthy {
                runtime.consecutive_failures = 0;
                runtime.state = ChildState::Healthy;
            } else {
                runtime.consecutive_failures += 1;
                warn!(
                    "Child {} health failure {}/{}",
                    name, runtime.consecutive_failures, self.config.limits.unhealthy_after
                );
                if runtime.consecutive_failures >= self.config.limits.unhealthy_after {
                    runtime.state = ChildState::Unhealthy;
                    restart_needed = true;
                }
            }
        }
        if restart_needed {
            self.restart_child(name).await;
        }
    }

    /// Restart an unhealthy child with exponential backoff, holding it in
    /// `Failed` once the rolling-window budget is exhausted.
    async fn restart_child(&self, name: &str) {
        let window = Duration::from_secs(self.config.limits.restart_window_secs.max(0) as u64);
        let attempt = {
            let mut children = self.children.lock().await;
            let runtime = children.get_mut(name).expect("known child");

            let now = Instant::now();
            runtime.restarts.retain(|t| now.duration_since(*t) < window);
            if runtime.restarts.len() as u32 >= self.config.limits.max_restarts {
                error!(
                    "Child {} exhausted {} restarts in the window; holding until manual reset",
                    name, self.config.limits.max_restarts
                );
                runtime.state = ChildState::Failed;
                if let Some(mut process) = runtime.process.take() {
                    let _ = process.start_kill();
                }
                return;
            }
            runtime.restarts.push(now);
            runtime.restarts.len() as u32
        };

        let delay = restart_backoff(attempt);
        warn!("Restarting child {} (attempt {}, backoff {:?})", name, attempt, delay);
        tokio::time::sleep(delay).await;

        {
            let mut children = self.children.lock().await;
            let runtime = children.get_mut(name).expect("known child");
            if let Some(mut process) = runtime.process.take() {
                let _ = process.start_kill();
            }
        }
        if let Err(e) = self.spawn_child(name).await {
            error!("Restart of {} failed: {}", name, e);
        }
    }

    /// Clear a held child so the health loop may restart it again.
    pub async fn reset_child(&self, name: &str) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(name) {
            Some(runtime) => {
                runtime.state = ChildState::Stopped;
                runtime.restarts.clear();
                runtime.consecutive_failures = 0;
                info!("Child {} reset", name);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Snapshot & shutdown
    // ------------------------------------------------------------------

    pub async fn snapshot(&self) -> SupervisorSnapshot {
        let statuses = {
            let children = self.children.lock().await;
            let mut statuses: Vec<ChildStatus> = children
                .values()
                .map(|runtime| ChildStatus {
                    name: runtime.spec.name.clone(),
                    state: runtime.state,
                    pid: runtime.process.as_ref().and_then(|p| p.id()),
                    consecutive_failures: runtime.consecutive_failures,
                    restarts_in_window: runtime.restarts.len(),
                })
                .collect();
            statuses.sort_by(|a, b| a.name.cmp(&b.name));
            statuses
        };

        let recent_jobs = match &self.store {
            Some(store) => store
                .list_jobs(SNAPSHOT_JOB_LIMIT, JobFilter::default())
                .await
                .map(|jobs| jobs.iter().map(|j| j.snapshot()).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        };

        SupervisorSnapshot {
            children: statuses,
            recent_jobs,
        }
    }

    /// Terminate children in reverse dependency order.
    pub async fn shutdown(&self) {
        for name in self.start_order.iter().rev() {
            let mut children = self.children.lock().await;
            if let Some(runtime) = children.get_mut(name) {
                if let Some(mut process) = runtime.process.take() {
                    info!("Stopping child {}", name);
                    let _ = process.start_kill();
                    let _ = process.wait().await;
                }
                runtime.state = ChildState::Stopped;
            }
        }
    }
}

/// 2s, 4s, 8s, ... capped at 60s.
fn restart_backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let secs = RESTART_BACKOFF_BASE_SECS
        .saturating_mul(1u64 << exp)
        .min(RESTART_BACKOFF_MAX_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(restart_backoff(1), Duration::from_secs(2));
        assert_eq!(restart_backoff(2), Duration::from_secs(4));
        assert_eq!(restart_backoff(3), Duration::from_secs(8));
        assert_eq!(restart_backoff(10), Duration::from_secs(60));
    }

    fn config_without_children() -> SupervisorConfig {
        SupervisorConfig::from_str("").unwrap()
    }

    #[tokio::test]
    async fn snapshot_of_empty_supervisor() {
        let supervisor = Supervisor::new(config_without_children()).unwrap();
        let snapshot = supervisor.snapshot().await;
        assert!(snapshot.children.is_empty());
    }

    #[tokio::test]
    async fn reset_unknown_child_is_false() {
        let supervisor = Supervisor::new(config_without_children()).unwrap();
        assert!(!supervisor.reset_child("ghost").await);
    }

    #[tokio::test]
    async fn snapshot_includes_recent_jobs_when_store_attached() {
        use mondrian_protocol::{AnalysisMode, JobRecord};

        let store = Store::open_in_memory().await.unwrap();
        let record = JobRecord::new(
            "uploads/u.jpg".to_string(),
            "ansel".to_string(),
            AnalysisMode::Baseline,
        );
        store.create_job(&record).await.unwrap();

        let supervisor = Supervisor::new(config_without_children())
            .unwrap()
            .with_store(store);
        let snapshot = supervisor.snapshot().await;
        assert_eq!(snapshot.recent_jobs.len(), 1);
        assert_eq!(snapshot.recent_jobs[0].job_id, record.id);
    }

    #[tokio::test]
    async fn snapshot_reports_configured_children_as_stopped() {
        let raw = r#"
            [[child]]
            name = "model"
            command = "mondrian-model"
            health_url = "http://127.0.0.1:9/health"
        "#;
        let supervisor = Supervisor::new(SupervisorConfig::from_str(raw).unwrap()).unwrap();
        let snapshot = supervisor.snapshot().await;
        assert_eq!(snapshot.children.len(), 1);
        assert_eq!(snapshot.children[0].name, "model");
        assert_eq!(snapshot.children[0].state, ChildState::Stopped);
        assert_eq!(snapshot.children[0].pid, None);
    }
}
