//! API route modules.

pub mod health;
pub mod logging;
pub mod pipeline;

use axum::Router;
use axum::routing::{get, post};

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/pipeline", pipeline::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        // Paths used by existing callers of the standalone trigger service.
        .route("/trigger_pipeline", post(pipeline::trigger))
        .route("/status", get(pipeline::status))
        .with_state(state)
}
