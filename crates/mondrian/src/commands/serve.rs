//! `mondrian serve`: HTTP API + job engine + reaper in one process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use mondrian_engine::{EngineConfig, JobEngine};
use mondrian_protocol::defaults;
use mondrian_retrieval::EmbeddingClient;
use mondrian_strategy::{AdapterCache, Dispatcher, FsAdapterLoader, HttpModelBackend};
use mondrian_store::Store;
use mondrian_supervisor::{reaper_loop, JobReaper};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// State store URL (sqlite:PATH | sqlite::memory:)
    #[arg(long, env = "MONDRIAN_STORE")]
    store: Option<String>,

    /// HTTP bind address
    #[arg(long, env = "MONDRIAN_BIND", default_value = defaults::DEFAULT_BIND_ADDR)]
    bind: String,

    /// Directory for uploaded originals
    #[arg(long, env = "MONDRIAN_UPLOAD_DIR", default_value = defaults::DEFAULT_UPLOAD_DIR)]
    upload_dir: PathBuf,

    /// Model service base URL
    #[arg(long, env = "MONDRIAN_MODEL_URL", default_value = "http://127.0.0.1:8092")]
    model_url: String,

    /// Base model handle passed to the model service
    #[arg(long, default_value = "mondrian-vision-base")]
    base_model: String,

    /// Embeddings service base URL; unset disables the visual path
    #[arg(long, env = "MONDRIAN_EMBEDDINGS_URL")]
    embeddings_url: Option<String>,

    /// Root directory for LoRA adapters
    #[arg(long, env = "MONDRIAN_ADAPTER_ROOT")]
    adapter_root: Option<PathBuf>,

    /// Advisor catalog JSON to seed on boot
    #[arg(long)]
    advisors: Option<PathBuf>,

    /// Worker pool degree
    #[arg(long, default_value_t = defaults::DEFAULT_WORKER_COUNT)]
    workers: usize,

    /// Per-call model budget in seconds
    #[arg(long, default_value_t = defaults::MODEL_CALL_TIMEOUT_SECS)]
    model_timeout_secs: u64,

    /// Wall-clock budget before a job is reaped, in seconds
    #[arg(long, default_value_t = defaults::JOB_TIMEOUT_SECS)]
    job_timeout_secs: i64,

    /// Reaper cadence in seconds
    #[arg(long, default_value_t = defaults::CLEANUP_INTERVAL_SECS)]
    cleanup_interval_secs: u64,

    /// Shutdown drain window in seconds
    #[arg(long, default_value_t = defaults::DRAIN_WINDOW_SECS)]
    drain_secs: u64,
}

/// Engine-backed reaper: reaped jobs emit their terminal SSE events.
struct EngineReaper {
    engine: Arc<JobEngine>,
    timeout: chrono::Duration,
}

#[async_trait]
impl JobReaper for EngineReaper {
    async fn reap(&self) -> Result<usize> {
        Ok(self.engine.reap_stale(self.timeout).await?)
    }
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let store_url = args.store.unwrap_or_else(super::default_store_url);
    info!("Opening state store: {}", store_url);
    let store = Store::open(&store_url).await?;

    if let Some(path) = &args.advisors {
        let seeded = super::advisors::seed_from_file(&store, path).await?;
        info!("Seeded {} advisors from {}", seeded, path.display());
    }

    let model = HttpModelBackend::new(
        args.model_url.as_str(),
        Duration::from_secs(args.model_timeout_secs),
    )
    .map_err(|e| anyhow::anyhow!("model backend: {e}"))?;
    let adapter_root = args.adapter_root.unwrap_or_else(super::default_adapter_root);
    let mut dispatcher = Dispatcher::new(
        Arc::new(store.clone()),
        Arc::new(model),
        AdapterCache::new(Arc::new(FsAdapterLoader::new(adapter_root))),
        args.base_model,
    );
    if let Some(url) = &args.embeddings_url {
        let embeddings = EmbeddingClient::new(url.as_str(), Duration::from_secs(30))
            .map_err(|e| anyhow::anyhow!("embedding client: {e}"))?;
        dispatcher = dispatcher.with_embeddings(Arc::new(embeddings));
        info!("Visual similarity enabled via {}", url);
    }

    let engine = Arc::new(JobEngine::new(
        store,
        Arc::new(dispatcher),
        EngineConfig {
            worker_count: args.workers,
            ..EngineConfig::default()
        },
    ));
    let _tasks = engine.start();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reaper = Arc::new(EngineReaper {
        engine: Arc::clone(&engine),
        timeout: chrono::Duration::seconds(args.job_timeout_secs),
    });
    let reaper_task = tokio::spawn(reaper_loop(
        reaper,
        Duration::from_secs(args.cleanup_interval_secs),
        shutdown_rx,
    ));

    mondrian_server::serve(Arc::clone(&engine), args.upload_dir, &args.bind)
        .await
        .with_context(|| format!("HTTP server on {}", args.bind))?;

    info!("Signal received, shutting down");
    engine.shutdown(Duration::from_secs(args.drain_secs)).await;
    let _ = shutdown_tx.send(true);
    let _ = reaper_task.await;
    Ok(())
}
