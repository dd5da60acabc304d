//! Pipeline trigger and status routes.

use axum::{Json, Router, extract::State, http::StatusCode, routing::get, routing::post};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::TriggerResponse;
use crate::api::server::AppState;
use crate::pipeline::{StatusSnapshot, Submission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trigger", post(trigger))
        .route("/status", get(status))
}

/// Start a background run, or answer 429 while one is in flight.
pub async fn trigger(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    match state.guard.submit() {
        Submission::Accepted(handle) => {
            let run_id = handle.run_id();
            info!(%run_id, "Pipeline run triggered over HTTP");
            Ok((
                StatusCode::ACCEPTED,
                Json(TriggerResponse {
                    message: "pipeline run started in the background".to_string(),
                    run_id,
                }),
            ))
        }
        Submission::Busy => Err(ApiError::busy()),
    }
}

pub async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.guard.status())
}
