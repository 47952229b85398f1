mod api;
mod config;

use anyhow::{Context, Result};
use config::Config;
use log::info;
use registry::{HttpMasterSource, RegistryService};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Registry server starting...");
    let config = Config::from_env()?;
    info!("Master servers: {}", config.master_urls.join(", "));

    let source = HttpMasterSource::new(config.master_urls.clone(), config.fetch_timeout)?;
    let service = Arc::new(RegistryService::with_debounce(
        Arc::new(source),
        config.reconcile_debounce,
    ));

    // Keep the registry in sync with the master listing without API traffic
    let mut passes = service.passes();
    let reconciler = service.spawn_auto_reconcile(config.reconcile_interval);

    // Serve once the first pass has finished, successful or not
    if passes.changed().await.is_ok() {
        info!("Initial pass done, {} servers known", service.registry().await.server_count());
    }

    let app = api::create_router(service, config.body_limit);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Registry server listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /             - Health check");
    info!("  POST /api/init     - Register, list clients, or look up a name");
    info!("  POST /api/updates  - Poll peer updates (token)");
    info!("  POST /api/set      - Set or clear identification data (token)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    reconciler.abort();
    info!("Registry server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down gracefully...");
}
