//! Model callable boundary.
//!
//! The vision model is a black box: image plus prompt in, JSON string out.
//! Everything above treats it as a total function with two failure modes.
//! Concurrent calls on one handle are serialized by [`ModelGate`]; the
//! handle is a singleton resource.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Identifies a concrete model instance: the base plus an optional adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelHandle {
    pub base: String,
    pub adapter: Option<String>,
}

impl ModelHandle {
    pub fn base_only(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            adapter: None,
        }
    }

    pub fn with_adapter(base: impl Into<String>, adapter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            adapter: Some(adapter.into()),
        }
    }
}

/// The model callable's two failure modes.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,
    #[error("model produced unusable output: {0}")]
    BadOutput(String),
}

/// Side channel for short model "thinking" strings, keyed to a job upstream.
///
/// Cloning shares the channel; a disabled sink drops pushes silently.
#[derive(Debug, Clone)]
pub struct ThinkingSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl ThinkingSink {
    /// A sink wired to a receiver the job engine drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn push(&self, text: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(text.into());
        }
    }
}

/// The only boundary that touches actual ML runtime.
#[async_trait]
pub trait ModelCallable: Send + Sync {
    /// Run the model on an image with a prompt. The returned string is
    /// expected to parse as the eight-dimension JSON schema.
    async fn run_model(
        &self,
        image_ref: &str,
        prompt: &str,
        handle: &ModelHandle,
        thinking: &ThinkingSink,
    ) -> Result<String, ModelError>;
}

/// Serializes concurrent calls per model handle.
///
/// No lock is held across anything but the model call itself.
pub struct ModelGate {
    inner: Arc<dyn ModelCallable>,
    locks: Mutex<HashMap<ModelHandle, Arc<Mutex<()>>>>,
}

impl ModelGate {
    pub fn new(inner: Arc<dyn ModelCallable>) -> Self {
        Self {
            inner,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(
        &self,
        image_ref: &str,
        prompt: &str,
        handle: &ModelHandle,
        thinking: &ThinkingSink,
    ) -> Result<String, ModelError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(handle.clone()).or_default())
        };
        let _guard = lock.lock().await;
        debug!("Model call on handle {}", handle.base);
        self.inner.run_model(image_ref, prompt, handle, thinking).await
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    image_ref: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    adapter: Option<&'a str>,
}

/// Production model backend: the model service over HTTP.
pub struct HttpModelBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpModelBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::BadOutput(format!("failed to build model client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl ModelCallable for HttpModelBackend {
    async fn run_model(
        &self,
        image_ref: &str,
        prompt: &str,
        handle: &ModelHandle,
        _thinking: &ThinkingSink,
    ) -> Result<String, ModelError> {
        let response = self
            .client
            .post(format!("{}/v1/analyze", self.base_url))
            .json(&AnalyzeRequest {
                image_ref,
                prompt,
                adapter: handle.adapter.as_deref(),
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::BadOutput(format!("model backend request failed: {e}"))
                }
            })?;

        let response = response
            .error_for_status()
            .map_err(|e| ModelError::BadOutput(format!("model backend status: {e}")))?;

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::BadOutput(format!("model backend body: {e}"))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowModel {
        concurrent: AtomicUsize,
        max_seen: AtomicUsize,
    }

    #[async_trait]
    impl ModelCallable for SlowModel {
        async fn run_model(
            &self,
            _image_ref: &str,
            _prompt: &str,
            _handle: &ModelHandle,
            _thinking: &ThinkingSink,
        ) -> Result<String, ModelError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok("{}".to_string())
        }
    }

    #[tokio::test]
    async fn gate_serializes_same_handle() {
        let model = Arc::new(SlowModel {
            concurrent: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let gate = Arc::new(ModelGate::new(model.clone()));
        let handle = ModelHandle::base_only("base");

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                gate.run("img", "prompt", &handle, &ThinkingSink::disabled())
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(model.max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_handles_may_overlap() {
        let model = Arc::new(SlowModel {
            concurrent: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let gate = Arc::new(ModelGate::new(model.clone()));

        let a = ModelHandle::base_only("base");
        let b = ModelHandle::with_adapter("base", "adapters/ansel");

        let gate_a = Arc::clone(&gate);
        let t1 = tokio::spawn(async move {
            gate_a.run("img", "p", &a, &ThinkingSink::disabled()).await.unwrap();
        });
        let gate_b = Arc::clone(&gate);
        let t2 = tokio::spawn(async move {
            gate_b.run("img", "p", &b, &ThinkingSink::disabled()).await.unwrap();
        });
        t1.await.unwrap();
        t2.await.unwrap();
        assert!(model.max_seen.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn thinking_sink_delivers_in_order() {
        let (sink, mut rx) = ThinkingSink::channel();
        sink.push("first");
        sink.push("second");
        assert_eq!(rx.recv().await.unwrap(), "first");
        assert_eq!(rx.recv().await.unwrap(), "second");

        // Disabled sink drops silently.
        ThinkingSink::disabled().push("nowhere");
    }
}
