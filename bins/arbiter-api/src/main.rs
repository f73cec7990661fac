mod handlers;
mod metrics;
mod routes;

#[cfg(test)]
mod api_tests;

use anyhow::{Context, Result};
use arbiter_common::config::{LogFormat, ServiceConfig};
use arbiter_common::store::{open_store, ChallengeStore};
use arbiter_engine::{build_orchestrator, LanguageRegistry, Orchestrator};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Shared, read-only state handed to every request
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub store: Arc<dyn ChallengeStore>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    init_tracing(config.log_format);

    info!("Arbiter API booting...");

    let registry = LanguageRegistry::load_or_builtin(&config.languages_path)?;
    let orchestrator = build_orchestrator(&config.engine, registry)?;
    let store = open_store(&config.challenge_store).await?;

    let state = Arc::new(AppState { orchestrator, store });
    let app = routes::app(state, &config.base_path, config.cors_origins.as_deref());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!(
        addr = %config.bind_addr,
        base_path = %config.base_path,
        backend = ?config.engine.backend,
        "HTTP server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Arbiter API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
