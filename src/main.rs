use anyhow::{Context, Result};
use labstatus::api::{create_status_router, StatusAppState};
use labstatus::cache::RefreshCache;
use labstatus::config;
use labstatus::upstream::HassClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "labstatus=info".into()),
        )
        .init();

    info!("labstatus starting...");

    if let Err(e) = dotenvy::dotenv() {
        debug!("No .env file loaded: {}", e);
    }

    let config = config::load().context("Failed to load configuration")?;

    let client = HassClient::new(&config.upstream)?;
    info!(
        upstream = %client.url(),
        bind_addr = %config.server.bind_addr,
        "Configuration loaded"
    );

    let state = Arc::new(StatusAppState {
        cache: RefreshCache::new(Arc::new(client)),
    });
    let router = create_status_router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "Status API listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Status API server error")?;

    info!("labstatus stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Keep serving without a shutdown trigger
        tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
