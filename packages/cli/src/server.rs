// ABOUTME: Wires configuration, the Daytona provider and the HTTP router into a running server
// ABOUTME: Adds CORS and request tracing layers and shuts down cleanly on Ctrl+C

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::Router;
use deskrun_api::{create_router, AppState};
use deskrun_sandbox::{DaytonaProvider, Provider, ProvisionConfig, Provisioner};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{Config, ConfigError};

pub fn cors_layer(config: &Config) -> Result<CorsLayer, ConfigError> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Ok(match &config.cors_origin {
        Some(origin) => cors.allow_origin(
            origin
                .parse::<HeaderValue>()
                .map_err(|_| ConfigError::InvalidCorsOrigin(origin.clone()))?,
        ),
        None => cors.allow_origin(Any),
    })
}

/// Build the full application around `provider`
pub fn build_app(config: &Config, provider: Arc<dyn Provider>) -> Result<Router, ConfigError> {
    let state = AppState::new(Provisioner::new(provider, ProvisionConfig::default()));

    Ok(create_router(state)
        .layer(cors_layer(config)?)
        .layer(TraceLayer::new_for_http()))
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let provider = DaytonaProvider::new(config.daytona_config())
        .context("Failed to initialize Daytona client")?;
    if let Err(e) = provider.ensure_credentials() {
        warn!("{}; sandbox creation will fail until it is set", e);
    }

    let app = build_app(&config, Arc::new(provider))?;
    let addr = config.socket_addr();

    info!(
        "Daytona API: {} (target: {})",
        config.daytona_api_url, config.daytona_target
    );
    info!(
        "CORS origin: {}",
        config.cors_origin.as_deref().unwrap_or("any")
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C; never resolves if the signal cannot be installed
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
