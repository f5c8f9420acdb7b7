//! Standalone worker: consumes every lane until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use bookforge_infra::jobs::{WorkerConfig, WorkerRuntime};
use bookforge_infra::render::StandardRenderer;
use bookforge_infra::{Backends, PipelineConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    bookforge_observability::init();

    let config = PipelineConfig::from_env();
    if !config.use_persistent_stores {
        tracing::warn!("USE_PERSISTENT_STORES is off; this worker only sees its own in-memory lanes");
    }

    let backends = Backends::from_config(&config)
        .await
        .context("failed to wire backends")?;
    let tracker = backends.tracker(config.status_ttl);

    let runtime = Arc::new(WorkerRuntime::new(
        backends.broker,
        tracker,
        backends.blobs,
        Arc::new(StandardRenderer),
        WorkerConfig::from_pipeline(&config),
    ));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                signal.cancel();
            }
            Err(err) => tracing::warn!(error = %err, "cannot listen for ctrl-c"),
        }
    });

    // Fails fast once the bounded connection attempts are used up.
    Arc::clone(&runtime)
        .run(shutdown)
        .await
        .context("worker failed")?;

    let stats = runtime.stats();
    tracing::info!(
        deliveries = stats.deliveries,
        completed = stats.completed,
        requeued = stats.requeued,
        dead_lettered = stats.dead_lettered,
        reconnects = stats.reconnects,
        "worker stopped"
    );
    Ok(())
}
