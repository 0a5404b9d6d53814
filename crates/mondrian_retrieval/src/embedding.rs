//! Client for the embeddings/caption service.
//!
//! Speaks the service's HTTP interface (`POST /index`, `POST /search`). Any
//! transport or decode failure is reported as [`EmbeddingError`]; callers
//! treat the visual path as unavailable and proceed without it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("embedding service returned no embedding for {0}")]
    MissingEmbedding(String),
}

/// Computes a query embedding for an image. The production implementation is
/// [`EmbeddingClient`]; tests substitute in-process fakes.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, image_ref: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Debug, Serialize)]
struct IndexRequest<'a> {
    image_ref: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<&'a str>,
}

/// Response of `POST /index`.
#[derive(Debug, Deserialize)]
pub struct IndexResponse {
    #[serde(default)]
    pub caption: Option<String>,
    pub embedding_dim: usize,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// One hit of `POST /search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub image_ref: String,
    pub score: f32,
    #[serde(default)]
    pub caption: Option<String>,
}

/// HTTP client for the embeddings service.
#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// Index an image and return its caption and embedding.
    pub async fn index(
        &self,
        image_ref: &str,
        job_id: Option<&str>,
    ) -> Result<IndexResponse, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/index", self.base_url))
            .json(&IndexRequest { image_ref, job_id })
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Free-form similarity search against the service's own index.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&serde_json::json!({ "query": query, "top_k": top_k }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl EmbeddingBackend for EmbeddingClient {
    async fn embed(&self, image_ref: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self.index(image_ref, None).await?;
        match response.embedding {
            Some(embedding) => Ok(embedding),
            None => {
                warn!("Embedding service indexed {} without a vector", image_ref);
                Err(EmbeddingError::MissingEmbedding(image_ref.to_string()))
            }
        }
    }
}
