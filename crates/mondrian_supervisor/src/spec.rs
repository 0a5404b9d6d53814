//! Supervisor configuration: managed children and limits.

use mondrian_protocol::defaults;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate child name: {0}")]
    DuplicateChild(String),
    #[error("child {child} depends on unknown child {dependency}")]
    UnknownDependency { child: String, dependency: String },
    #[error("dependency cycle involving {0}")]
    Cycle(String),
}

/// One managed child process.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChildSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Polled with GET; any 2xx means healthy
    pub health_url: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_health_interval() -> u64 {
    defaults::HEALTH_POLL_INTERVAL_SECS
}
fn default_unhealthy_after() -> u32 {
    defaults::UNHEALTHY_AFTER_FAILURES
}
fn default_max_restarts() -> u32 {
    defaults::MAX_RESTART_ATTEMPTS
}
fn default_restart_window() -> i64 {
    defaults::RESTART_WINDOW_SECS
}
fn default_job_timeout() -> i64 {
    defaults::JOB_TIMEOUT_SECS
}
fn default_cleanup_interval() -> u64 {
    defaults::CLEANUP_INTERVAL_SECS
}
fn default_drain() -> u64 {
    defaults::DRAIN_WINDOW_SECS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_unhealthy_after")]
    pub unhealthy_after: u32,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_window")]
    pub restart_window_secs: i64,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: i64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_drain")]
    pub drain_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: default_health_interval(),
            unhealthy_after: default_unhealthy_after(),
            max_restarts: default_max_restarts(),
            restart_window_secs: default_restart_window(),
            job_timeout_secs: default_job_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            drain_secs: default_drain(),
        }
    }
}

/// Full supervisor configuration (`[[child]]` tables plus `[limits]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    #[serde(rename = "child", default)]
    pub children: Vec<ChildSpec>,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl SupervisorConfig {
    pub fn from_str(raw: &str) -> Result<Self, SpecError> {
        let config: SupervisorConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, SpecError> {
        Self::from_str(&std::fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<(), SpecError> {
        let mut names = HashSet::new();
        for child in &self.children {
            if !names.insert(child.name.as_str()) {
                return Err(SpecError::DuplicateChild(child.name.clone()));
            }
        }
        // Topo order surfaces unknown deps and cycles.
        self.start_order().map(|_| ())
    }

    /// Children in dependency order: every child appears after all of its
    /// dependencies. Kahn's algorithm with name-ordered tie break so the
    /// order is deterministic.
    pub fn start_order(&self) -> Result<Vec<String>, SpecError> {
        let known: HashSet<&str> = self.children.iter().map(|c| c.name.as_str()).collect();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for child in &self.children {
            in_degree.entry(child.name.as_str()).or_insert(0);
            for dep in &child.depends_on {
                if !known.contains(dep.as_str()) {
                    return Err(SpecError::UnknownDependency {
                        child: child.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                *in_degree.entry(child.name.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(child.name.as_str());
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(name, _)| *name)
            .collect();
        ready.sort_unstable();

        let mut order = Vec::with_capacity(self.children.len());
        while let Some(name) = ready.first().copied() {
            ready.remove(0);
            order.push(name.to_string());
            if let Some(next) = dependents.get(name) {
                for dependent in next {
                    let degree = in_degree.get_mut(dependent).expect("known child");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(dependent);
                        ready.sort_unstable();
                    }
                }
            }
        }

        if order.len() != self.children.len() {
            let stuck = self
                .children
                .iter()
                .find(|c| !order.contains(&c.name))
                .map(|c| c.name.clone())
                .unwrap_or_default();
            return Err(SpecError::Cycle(stuck));
        }
        Ok(order)
    }

    pub fn child(&self, name: &str) -> Option<&ChildSpec> {
        self.children.iter().find(|c| c.name == name)
    }
}
