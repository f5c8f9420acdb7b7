//! Adapter selection: in-memory for tests and single-process runs, Redis +
//! filesystem when `use_persistent_stores` is set.

use std::sync::Arc;
use std::time::Duration;

use bookforge_events::{Broker, InMemoryBroker};
use thiserror::Error;
use tracing::info;

use crate::blob::{BlobStore, InMemoryBlobStore};
use crate::config::PipelineConfig;
use crate::status::{InMemoryStatusStore, StatusStore, StatusTracker};

#[derive(Debug, Error)]
pub enum BackendsError {
    #[error("persistent stores requested but this build has no redis support")]
    RedisDisabled,

    #[error("failed to open {backend}: {reason}")]
    Open { backend: &'static str, reason: String },
}

/// The three external collaborators behind their contracts.
#[derive(Clone)]
pub struct Backends {
    pub broker: Arc<dyn Broker>,
    pub status: Arc<dyn StatusStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub persistent: bool,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}

impl Backends {
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, BackendsError> {
        if config.use_persistent_stores {
            Self::persistent(config).await
        } else {
            info!("using in-memory broker, status store and blob store");
            Ok(InMemoryBackends::new().backends())
        }
    }

    #[cfg(feature = "redis")]
    async fn persistent(config: &PipelineConfig) -> Result<Self, BackendsError> {
        use crate::blob::FsBlobStore;
        use crate::broker::RedisStreamsBroker;
        use crate::status::RedisStatusStore;

        let broker = RedisStreamsBroker::new(&config.redis_url).map_err(|e| BackendsError::Open {
            backend: "broker",
            reason: e.to_string(),
        })?;
        let status = RedisStatusStore::new(&config.redis_url).map_err(|e| BackendsError::Open {
            backend: "status store",
            reason: e.to_string(),
        })?;
        let blobs = FsBlobStore::open(config.blob_dir.clone())
            .await
            .map_err(|e| BackendsError::Open {
                backend: "blob store",
                reason: e.to_string(),
            })?;

        info!(blob_dir = %config.blob_dir, "using redis broker/status store and filesystem blobs");
        Ok(Self {
            broker: Arc::new(broker),
            status: Arc::new(status),
            blobs: Arc::new(blobs),
            persistent: true,
        })
    }

    #[cfg(not(feature = "redis"))]
    async fn persistent(_config: &PipelineConfig) -> Result<Self, BackendsError> {
        Err(BackendsError::RedisDisabled)
    }

    pub fn tracker(&self, ttl: Duration) -> StatusTracker {
        StatusTracker::new(Arc::clone(&self.status)).with_ttl(ttl)
    }
}

/// In-memory adapters with their concrete types kept, so tests can inject outages.
#[derive(Clone, Default)]
pub struct InMemoryBackends {
    pub broker: Arc<InMemoryBroker>,
    pub status: Arc<InMemoryStatusStore>,
    pub blobs: Arc<InMemoryBlobStore>,
}

impl InMemoryBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backends(&self) -> Backends {
        Backends {
            broker: self.broker.clone(),
            status: self.status.clone(),
            blobs: self.blobs.clone(),
            persistent: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_in_memory() {
        let backends = Backends::from_config(&PipelineConfig::default()).await.unwrap();
        assert!(!backends.persistent);
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn persistent_requires_redis_feature() {
        let config = PipelineConfig {
            use_persistent_stores: true,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            Backends::from_config(&config).await,
            Err(BackendsError::RedisDisabled)
        ));
    }

    #[tokio::test]
    async fn in_memory_backends_share_state() {
        let memory = InMemoryBackends::new();
        let tracker = memory.backends().tracker(Duration::from_secs(60));
        let id = bookforge_core::TaskId::new();
        assert!(tracker.record(id, bookforge_core::StatusRecord::queued("queued")).await);
        assert_eq!(memory.status.len(), 1);
    }
}
