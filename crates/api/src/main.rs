use anyhow::Context;
use tracing::info;

use medscribe_api::app::{build_app, services::openai_backend};
use medscribe_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    medscribe_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let backend = openai_backend(&config).context("failed to build AI backend")?;

    let app = build_app(&config, backend)
        .await
        .context("failed to start services")?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    app.background.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
