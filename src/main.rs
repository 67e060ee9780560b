//! Waypost shipment tracking service.
//!
//! Main entry point for the Waypost server. Loads configuration, selects the
//! record store, and coordinates graceful startup and shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use waypost_api::{shutdown_signal, start_server, AppState, Config, Links};
use waypost_core::{Clock, RealClock, SelectedStore};
use waypost_live::SubscriberRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize tracing with structured logging
    init_tracing(&config.rust_log)?;

    info!("Starting Waypost tracking service");
    info!(
        database_url = %config.database_url_masked(),
        data_dir = %config.data_dir.display(),
        frontend_url = %config.frontend_url,
        keepalive_interval_secs = config.keepalive_interval_secs,
        "Configuration loaded"
    );

    let addr = config.parse_server_addr()?;
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());

    // Resolve the backend before taking traffic. Requests would wait on the
    // gate anyway, but failing here surfaces an unusable data directory early.
    let store = Arc::new(SelectedStore::new(config.to_store_options(), clock.clone()));
    let backend = store.resolve().await.context("Failed to open tracking store")?;
    let status = store.status();
    if status.is_degraded() {
        warn!(
            reason = status.fallback_reason.as_deref().unwrap_or_default(),
            "Database configured but unavailable, serving from file store"
        );
    }
    info!(%backend, "Tracking store ready");

    let registry = Arc::new(SubscriberRegistry::new(config.to_registry_config(), clock.clone()));
    let state =
        AppState::new(store.clone(), registry.clone(), Links::new(&config.frontend_url), clock);

    let shutdown = {
        let registry = registry.clone();
        async move {
            shutdown_signal().await;
            // Open event streams never finish on their own.
            registry.close_all();
        }
    };

    info!(%addr, "Waypost is ready to serve tracking links");
    start_server(state, addr, config.request_timeout(), shutdown)
        .await
        .context("HTTP server failed")?;

    store.close().await;

    info!("Waypost shutdown complete");
    Ok(())
}

/// Initializes tracing with the configured filter.
fn init_tracing(filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(filter)
        .or_else(|_| EnvFilter::try_new("info,waypost=debug,tower_http=debug"))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}
