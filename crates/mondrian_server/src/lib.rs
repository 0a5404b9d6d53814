//! HTTP front end for the Mondrian pipeline.
//!
//! Local, unauthenticated API: multipart upload creates a job, `/status` and
//! `/stream` expose its progress (snapshot and SSE respectively), and
//! `/analysis` serves the rendered critique once the job is done.

mod error;
mod routes;
mod sse;

use axum::routing::{get, post};
use axum::Router;
use mondrian_engine::JobEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<JobEngine>,
    pub upload_dir: PathBuf,
}

/// Build the router over an engine.
pub fn router(engine: Arc<JobEngine>, upload_dir: PathBuf) -> Router {
    let state = AppState { engine, upload_dir };
    Router::new()
        .route("/upload", post(routes::upload))
        .route("/status/:id", get(routes::status))
        .route("/stream/:id", get(sse::stream))
        .route("/analysis/:id", get(routes::analysis))
        .route("/advisors", get(routes::advisors))
        .route("/advisors/:id", get(routes::advisor))
        .route("/jobs", get(routes::jobs))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until ctrl-c.
pub async fn serve(
    engine: Arc<JobEngine>,
    upload_dir: PathBuf,
    bind_addr: &str,
) -> std::io::Result<()> {
    let app = router(engine, upload_dir);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("HTTP API listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
