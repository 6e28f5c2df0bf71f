// ABOUTME: HTTP layer for Deskrun exposing the control API and the VNC gateway
// ABOUTME: Builds the axum router over a shared registry and provisioner

use axum::{
    routing::{get, post},
    Router,
};

pub mod error;
pub mod health;
pub mod sandbox_handlers;
pub mod state;
pub mod vnc_handlers;

pub use error::AppError;
pub use state::AppState;

/// Creates the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/status", get(sandbox_handlers::sandbox_status))
        .route("/api/create", post(sandbox_handlers::create_sandbox))
        .route("/api/stop", post(sandbox_handlers::stop_sandbox))
        .route("/vnc/{id}", get(vnc_handlers::vnc_page))
        .with_state(state)
}
