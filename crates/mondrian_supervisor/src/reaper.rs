//! Job reaper: marks jobs idle past their wall-clock budget as errored.

use async_trait::async_trait;
use chrono::Utc;
use mondrian_protocol::{ErrorKind, JobPatch};
use mondrian_store::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Something that can reap stale jobs. The engine implements a bus-aware
/// variant; [`StoreReaper`] works directly against the store for processes
/// that hold no subscriptions.
#[async_trait]
pub trait JobReaper: Send + Sync {
    /// Mark every job past the budget as errored. Idempotent. Returns how
    /// many jobs were reaped this pass.
    async fn reap(&self) -> anyhow::Result<usize>;
}

/// Store-backed reaper used by the standalone supervisor process.
pub struct StoreReaper {
    store: Store,
    timeout: chrono::Duration,
}

impl StoreReaper {
    pub fn new(store: Store, timeout: chrono::Duration) -> Self {
        Self { store, timeout }
    }
}

#[async_trait]
impl JobReaper for StoreReaper {
    async fn reap(&self) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - self.timeout;
        let stale = self.store.list_stale_jobs(cutoff).await?;
        let mut reaped = 0;
        for job in stale {
            warn!("Reaping job {}: idle since {}", job.id, job.last_activity);
            match self
                .store
                .mutate_job(
                    job.id,
                    JobPatch::failure(
                        ErrorKind::Timeout,
                        "job exceeded its wall-clock budget".to_string(),
                    ),
                )
                .await
            {
                Ok(_) => reaped += 1,
                // Lost a race with the worker finishing the job. Fine.
                Err(StoreError::TerminalJob(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(reaped)
    }
}

/// Run a reaper on a fixed cadence until shutdown.
pub async fn reaper_loop(
    reaper: Arc<dyn JobReaper>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match reaper.reap().await {
                    Ok(0) => {}
                    Ok(count) => info!("Reaped {} stale jobs", count),
                    Err(e) => warn!("Reaper pass failed: {}", e),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mondrian_protocol::{AnalysisMode, JobRecord, JobStatus};

    async fn store_with_stale_job() -> (Store, JobRecord) {
        let store = Store::open_in_memory().await.unwrap();
        let mut record = JobRecord::new(
            "uploads/stuck.jpg".to_string(),
            "ansel".to_string(),
            AnalysisMode::Baseline,
        );
        record.created_at = Utc::now() - chrono::Duration::seconds(3600);
        record.last_activity = record.created_at;
        store.create_job(&record).await.unwrap();
        (store, record)
    }

    #[tokio::test]
    async fn reaps_stale_jobs_once() {
        let (store, record) = store_with_stale_job().await;
        let reaper = StoreReaper::new(store.clone(), chrono::Duration::seconds(900));

        assert_eq!(reaper.reap().await.unwrap(), 1);

        let job = store.get_job(record.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_kind, Some(ErrorKind::Timeout));

        // Idempotent: a second pass changes nothing.
        assert_eq!(reaper.reap().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fresh_jobs_are_left_alone() {
        let store = Store::open_in_memory().await.unwrap();
        let record = JobRecord::new(
            "uploads/fresh.jpg".to_string(),
            "ansel".to_string(),
            AnalysisMode::Baseline,
        );
        store.create_job(&record).await.unwrap();

        let reaper = StoreReaper::new(store.clone(), chrono::Duration::seconds(900));
        assert_eq!(reaper.reap().await.unwrap(), 0);
        assert_eq!(
            store.get_job(record.id).await.unwrap().status,
            JobStatus::Queued
        );
    }
}
