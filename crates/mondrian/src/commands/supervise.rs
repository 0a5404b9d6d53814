//! `mondrian supervise`: child service management plus the standalone
//! store-level reaper.

use anyhow::{Context, Result};
use clap::Args;
use mondrian_store::Store;
use mondrian_supervisor::{reaper_loop, StoreReaper, Supervisor, SupervisorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Args, Debug)]
pub struct SuperviseArgs {
    /// Supervisor TOML config ([[child]] tables plus [limits])
    #[arg(long)]
    config: PathBuf,

    /// State store URL for the reaper; unset disables job reaping here
    #[arg(long, env = "MONDRIAN_STORE")]
    store: Option<String>,
}

pub async fn run(args: SuperviseArgs) -> Result<()> {
    let config = SupervisorConfig::from_path(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let limits = config.limits.clone();

    let store = match &args.store {
        Some(url) => Some(Store::open(url).await?),
        None => None,
    };

    let mut supervisor = Supervisor::new(config)?;
    if let Some(store) = &store {
        supervisor = supervisor.with_store(store.clone());
    }
    let supervisor = Arc::new(supervisor);

    supervisor.start_all().await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let health = {
        let supervisor = Arc::clone(&supervisor);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { supervisor.health_loop(shutdown_rx).await })
    };

    let reaper = match store {
        Some(store) => {
            let reaper = Arc::new(StoreReaper::new(
                store,
                chrono::Duration::seconds(limits.job_timeout_secs),
            ));
            Some(tokio::spawn(reaper_loop(
                reaper,
                Duration::from_secs(limits.cleanup_interval_secs),
                shutdown_rx,
            )))
        }
        None => {
            info!("No store configured; job reaping disabled in this process");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Signal received, stopping children");

    let _ = shutdown_tx.send(true);
    supervisor.shutdown().await;
    let _ = health.await;
    if let Some(task) = reaper {
        let _ = task.await;
    }
    Ok(())
}
