//! Request handlers.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use mondrian_engine::JobSubmission;
use mondrian_protocol::{AnalysisMode, JobId, JobSnapshot, JobStatus};
use mondrian_store::{JobFilter, StoreError};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path as FsPath, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

pub(crate) fn job_id_from_path(raw: &str) -> Result<JobId, ApiError> {
    JobId::from_str(raw).map_err(|_| ApiError::not_found(format!("unknown job: {raw}")))
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// `POST /upload` — multipart form: `image` (file, required), `advisor`
/// (required), `mode` (optional), `enable_rag` (deprecated alias for
/// `mode=rag` when `mode` is omitted), `auto_analyze` (optional).
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut image: Option<(String, Vec<u8>)> = None;
    let mut advisor: Option<String> = None;
    let mut mode_raw: Option<String> = None;
    let mut enable_rag = false;
    let mut auto_analyze = true;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let filename = field.file_name().unwrap_or("upload.bin").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("unreadable image: {e}")))?;
                image = Some((filename, bytes.to_vec()));
            }
            "advisor" => {
                advisor = Some(read_text(field).await?);
            }
            "mode" => {
                mode_raw = Some(read_text(field).await?);
            }
            "enable_rag" => {
                enable_rag = parse_bool(&read_text(field).await?);
            }
            "auto_analyze" => {
                auto_analyze = parse_bool(&read_text(field).await?);
            }
            other => {
                debug!("Ignoring unknown upload field: {}", other);
            }
        }
    }

    let (filename, bytes) = image.ok_or_else(|| ApiError::bad_request("missing image field"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("empty image upload"));
    }
    let advisor = advisor.ok_or_else(|| ApiError::bad_request("missing advisor field"))?;

    // `mode` is authoritative; `enable_rag` only promotes the default.
    let mode = match &mode_raw {
        Some(raw) => {
            AnalysisMode::from_str(raw).map_err(ApiError::bad_request)?
        }
        None if enable_rag => AnalysisMode::Rag,
        None => AnalysisMode::Baseline,
    };

    if !auto_analyze {
        warn!("auto_analyze=false received; analysis proceeds regardless");
    }

    let image_ref = store_upload(&state.upload_dir, &filename, &bytes).await?;
    let record = state
        .engine
        .submit(JobSubmission {
            image_ref,
            advisor_spec: advisor.clone(),
            mode,
        })
        .await?;

    Ok(Json(json!({
        "job_id": record.id,
        "advisor": advisor,
        "status": record.status,
        "enable_rag": record.requested_mode.is_two_pass(),
        "stream_url": format!("/stream/{}", record.id),
        "status_url": format!("/status/{}", record.id),
    })))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("unreadable form field: {e}")))
}

/// Persist the uploaded bytes under a fresh name, keeping the extension.
async fn store_upload(
    upload_dir: &FsPath,
    filename: &str,
    bytes: &[u8],
) -> Result<String, ApiError> {
    let extension = FsPath::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let target: PathBuf = upload_dir.join(format!("{}.{}", Uuid::new_v4(), extension));

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| ApiError::internal(format!("upload dir: {e}")))?;
    tokio::fs::write(&target, bytes)
        .await
        .map_err(|e| ApiError::internal(format!("storing upload: {e}")))?;
    Ok(target.to_string_lossy().into_owned())
}

/// `GET /status/{id}` — full job snapshot.
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let job_id = job_id_from_path(&id)?;
    match state.engine.store().get_job(job_id).await {
        Ok(record) => Ok(Json(record.snapshot())),
        Err(StoreError::JobNotFound(_)) => Err(ApiError::not_found(format!("unknown job: {id}"))),
        Err(e) => Err(ApiError::internal(e.to_string())),
    }
}

/// `GET /analysis/{id}` — the rendered critique. 202 while the job is still
/// running, 404 for unknown or errored jobs.
pub async fn analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = job_id_from_path(&id)?;
    let record = match state.engine.store().get_job(job_id).await {
        Ok(record) => record,
        Err(StoreError::JobNotFound(_)) => {
            return Err(ApiError::not_found(format!("unknown job: {id}")))
        }
        Err(e) => return Err(ApiError::internal(e.to_string())),
    };

    match record.status {
        JobStatus::Done => {
            let output = record
                .rendered_output
                .ok_or_else(|| ApiError::internal("done job without rendered output"))?;
            Ok(Html(output).into_response())
        }
        JobStatus::Error => Err(ApiError::not_found("job ended in error")),
        _ => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": record.status,
                "percentage": record.percentage,
            })),
        )
            .into_response()),
    }
}

/// `GET /advisors` — the catalog.
pub async fn advisors(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let advisors = state
        .engine
        .store()
        .list_advisors()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({ "advisors": advisors })))
}

/// `GET /advisors/{id}`.
pub async fn advisor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<mondrian_protocol::Advisor>, ApiError> {
    match state.engine.store().get_advisor(&id).await {
        Ok(advisor) => Ok(Json(advisor)),
        Err(StoreError::AdvisorNotFound(_)) => {
            Err(ApiError::not_found(format!("unknown advisor: {id}")))
        }
        Err(e) => Err(ApiError::internal(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

/// `GET /jobs?limit=` — most-recent-first job listing.
pub async fn jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.unwrap_or(20).min(200);
    let jobs = state
        .engine
        .store()
        .list_jobs(limit, JobFilter::default())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let snapshots: Vec<JobSnapshot> = jobs.iter().map(|j| j.snapshot()).collect();
    Ok(Json(json!({ "jobs": snapshots })))
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let queued = state.engine.queued_jobs().await.unwrap_or(0);
    let active = state.engine.active_jobs().await.unwrap_or(0);
    Json(json!({
        "status": "healthy",
        "mode": "full",
        "queued": queued,
        "active": active,
        "accepting": state.engine.is_accepting(),
    }))
}
