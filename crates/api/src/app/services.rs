use std::sync::Arc;

use bookforge_infra::jobs::{Producer, WorkerConfig, WorkerHandle, WorkerRuntime};
use bookforge_infra::render::StandardRenderer;
use bookforge_infra::status::StatusTracker;
use bookforge_infra::{Backends, BackendsError, PipelineConfig};
use tokio::sync::Mutex;

/// Everything the handlers need: the producer, status reads, and (in dev
/// mode) the worker consuming the in-memory lanes.
pub struct AppServices {
    producer: Producer,
    tracker: StatusTracker,
    worker: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    pub fn new(backends: &Backends, config: &PipelineConfig) -> Self {
        let tracker = backends.tracker(config.status_ttl);
        Self {
            producer: Producer::new(Arc::clone(&backends.broker), tracker.clone()),
            tracker,
            worker: Mutex::new(None),
        }
    }

    /// Also consume the lanes from this process.
    pub fn with_in_process_worker(self, backends: &Backends, config: &PipelineConfig) -> Self {
        let runtime = WorkerRuntime::new(
            Arc::clone(&backends.broker),
            self.tracker.clone(),
            Arc::clone(&backends.blobs),
            Arc::new(StandardRenderer),
            WorkerConfig::from_pipeline(config),
        );
        tracing::info!(worker = %config.worker_name, "starting in-process worker");
        Self {
            worker: Mutex::new(Some(runtime.spawn())),
            ..self
        }
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Stop the in-process worker, if any. Idempotent.
    pub async fn shutdown(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.shutdown().await {
                tracing::warn!(error = %err, "in-process worker stopped with error");
            }
        }
    }
}

pub async fn build_services(config: &PipelineConfig) -> Result<Arc<AppServices>, BackendsError> {
    let backends = Backends::from_config(config).await?;
    let services = if backends.persistent {
        AppServices::new(&backends, config)
    } else {
        AppServices::new(&backends, config).with_in_process_worker(&backends, config)
    };

    // Lanes are redeclared on every submit; this only surfaces a dead broker early.
    if let Err(err) = services.producer().declare_lanes().await {
        tracing::warn!(error = %err, "could not declare lanes at startup");
    }

    Ok(Arc::new(services))
}
