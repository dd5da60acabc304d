//! HTTP contract tests driving the router in-process.

mod common;

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use common::{Harness, Script, wait_idle};
use danmaku_compress::api::error::ApiErrorResponse;
use danmaku_compress::api::models::{HealthResponse, TriggerResponse};
use danmaku_compress::api::{ApiServer, ApiServerConfig, AppState};
use danmaku_compress::pipeline::{BackgroundTaskGuard, LastResultPolicy, RunStatus, StatusSnapshot};
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tower::ServiceExt;

fn router(guard: &Arc<BackgroundTaskGuard>) -> axum::Router {
    ApiServer::new(ApiServerConfig::default(), AppState::new(Arc::clone(guard))).router()
}

async fn call(router: &axum::Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn json<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn trigger_accepts_then_reports_busy() {
    let gate = Arc::new(Notify::new());
    let harness = Harness::new(
        Script::Gate(Arc::clone(&gate)),
        Script::Complete,
        Script::Complete,
        Script::Complete,
    );
    let guard = harness.guard(LastResultPolicy::default());
    let app = router(&guard);

    let (status, body) = call(&app, Method::POST, "/api/pipeline/trigger").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: TriggerResponse = json(&body);

    let (status, body) = call(&app, Method::POST, "/api/pipeline/trigger").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let busy: ApiErrorResponse = json(&body);
    assert_eq!(busy.code, "BUSY");
    assert_eq!(busy.detail, "a run is already in progress");

    let (status, body) = call(&app, Method::GET, "/api/pipeline/status").await;
    assert_eq!(status, StatusCode::OK);
    let snapshot: StatusSnapshot = json(&body);
    assert!(snapshot.is_running);
    assert_eq!(snapshot.current_run_id, Some(accepted.run_id));

    gate.notify_one();
    wait_idle(&guard).await;

    let (_, body) = call(&app, Method::GET, "/api/pipeline/status").await;
    let snapshot: StatusSnapshot = json(&body);
    assert!(!snapshot.is_running);
    let last = snapshot.last_result.unwrap();
    assert_eq!(last.run_id, accepted.run_id);
    assert_eq!(last.status, RunStatus::Success);
}

#[tokio::test]
async fn legacy_paths_are_served() {
    let harness = Harness::all_complete();
    let guard = harness.guard(LastResultPolicy::default());
    let app = router(&guard);

    let (status, body) = call(&app, Method::GET, "/status").await;
    assert_eq!(status, StatusCode::OK);
    let snapshot: StatusSnapshot = json(&body);
    assert!(!snapshot.is_running);
    assert!(snapshot.last_result.is_none());

    let (status, _) = call(&app, Method::POST, "/trigger_pipeline").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_idle(&guard).await;

    let (_, body) = call(&app, Method::GET, "/status").await;
    let snapshot: StatusSnapshot = json(&body);
    assert_eq!(snapshot.last_result.unwrap().messages.len(), 8);
}

#[tokio::test]
async fn failed_run_is_visible_only_through_status() {
    let harness = Harness::new(
        Script::Fail("backup folder unreadable"),
        Script::Complete,
        Script::Complete,
        Script::Complete,
    );
    let guard = harness.guard(LastResultPolicy::default());
    let app = router(&guard);

    let (status, _) = call(&app, Method::POST, "/api/pipeline/trigger").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_idle(&guard).await;

    let (_, body) = call(&app, Method::GET, "/api/pipeline/status").await;
    let snapshot: StatusSnapshot = json(&body);
    let last = snapshot.last_result.unwrap();
    assert_eq!(last.status, RunStatus::PartialFailure);
    assert!(last.errors[0].contains("backup folder unreadable"));
}

#[tokio::test]
async fn health_reports_version_and_activity() {
    let harness = Harness::all_complete();
    let guard = harness.guard(LastResultPolicy::default());
    let app = router(&guard);

    let (status, body) = call(&app, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = json(&body);
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert!(!health.pipeline_running);
}

#[tokio::test]
async fn logging_filter_unavailable_without_subscriber() {
    let harness = Harness::all_complete();
    let guard = harness.guard(LastResultPolicy::default());
    let app = router(&guard);

    let (status, body) = call(&app, Method::GET, "/api/logging/filter").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let err: ApiErrorResponse = json(&body);
    assert_eq!(err.code, "SERVICE_UNAVAILABLE");
}
