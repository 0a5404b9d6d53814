//! Adapter handle cache.
//!
//! An adapter handle loads once per process; the outcome is cached per
//! advisor and reload is not attempted unless the handle is invalidated.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter not found: {0}")]
    NotFound(String),
}

/// Verifies an adapter handle can be applied to the base model.
#[async_trait]
pub trait AdapterLoader: Send + Sync {
    async fn load(&self, adapter: &str) -> Result<(), AdapterError>;
}

/// Production loader: the handle is a path under the adapter root.
pub struct FsAdapterLoader {
    root: PathBuf,
}

impl FsAdapterLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AdapterLoader for FsAdapterLoader {
    async fn load(&self, adapter: &str) -> Result<(), AdapterError> {
        let path = self.root.join(adapter);
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(()),
            Err(_) => Err(AdapterError::NotFound(adapter.to_string())),
        }
    }
}

/// Load-once cache of adapter outcomes, keyed by handle.
pub struct AdapterCache {
    loader: Arc<dyn AdapterLoader>,
    outcomes: Mutex<HashMap<String, bool>>,
}

impl AdapterCache {
    pub fn new(loader: Arc<dyn AdapterLoader>) -> Self {
        Self {
            loader,
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// True iff the adapter loads. The first call hits the loader; later
    /// calls return the cached outcome.
    pub async fn ensure_loaded(&self, adapter: &str) -> bool {
        let mut outcomes = self.outcomes.lock().await;
        if let Some(loaded) = outcomes.get(adapter) {
            return *loaded;
        }
        let loaded = match self.loader.load(adapter).await {
            Ok(()) => {
                debug!("Adapter {} loaded", adapter);
                true
            }
            Err(e) => {
                warn!("Adapter {} failed to load: {}", adapter, e);
                false
            }
        };
        outcomes.insert(adapter.to_string(), loaded);
        loaded
    }

    /// Drop the cached outcome so the next check reloads.
    pub async fn invalidate(&self, adapter: &str) {
        self.outcomes.lock().await.remove(adapter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: AtomicUsize,
        ok: bool,
    }

    #[async_trait]
    impl AdapterLoader for CountingLoader {
        async fn load(&self, adapter: &str) -> Result<(), AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ok {
                Ok(())
            } else {
                Err(AdapterError::NotFound(adapter.to_string()))
            }
        }
    }

    #[tokio::test]
    async fn loads_once_and_caches() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
            ok: true,
        });
        let cache = AdapterCache::new(loader.clone());

        assert!(cache.ensure_loaded("adapters/ansel").await);
        assert!(cache.ensure_loaded("adapters/ansel").await);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_cache_until_invalidated() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
            ok: false,
        });
        let cache = AdapterCache::new(loader.clone());

        assert!(!cache.ensure_loaded("adapters/missing").await);
        assert!(!cache.ensure_loaded("adapters/missing").await);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

        cache.invalidate("adapters/missing").await;
        assert!(!cache.ensure_loaded("adapters/missing").await);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }
}
