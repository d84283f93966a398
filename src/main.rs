use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fimidx_store::database::DatabaseManager;
use fimidx_store::handlers;
use fimidx_store::services::ObjService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, FIMIDX_STORAGE, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(fimidx_store::config::config().clone());
    tracing::info!(
        "Starting fimidx-store in {:?} mode with {} storage",
        config.environment,
        config.storage.kind
    );

    let service = ObjService::open(config.clone())
        .await
        .context("failed to open storage backend")?;
    let app = handlers::app(Arc::new(service));

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("fimidx-store listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    DatabaseManager::close_all().await;
    tracing::info!("fimidx-store stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
