use anyhow::Context;
use bookforge_infra::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    bookforge_observability::init();

    let config = PipelineConfig::from_env();
    let services = bookforge_api::app::services::build_services(&config)
        .await
        .context("failed to wire backends")?;
    let app = bookforge_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, persistent = config.use_persistent_stores, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    services.shutdown().await;
    Ok(())
}
