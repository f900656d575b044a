//! Router-level tests for the HTTP handlers.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use crate::config::QueuesConfig;
use crate::jobs::QueueClass;
use crate::queue::QueueSet;
use crate::server::{AppState, create_app};
use crate::worker::RuntimeStats;

fn state() -> AppState {
    AppState {
        queues: QueueSet::in_memory(&QueuesConfig::default()),
        stats: Arc::new(RuntimeStats::new()),
        failed_threshold: 100,
    }
}

async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
    let response = create_app(state)
        .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    (status, serde_json::from_slice(&bytes).expect("json"))
}

#[tokio::test]
async fn root_returns_service_info() {
    let (status, body) = get_json(state(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "pipeline-jobs");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn health_is_ok_with_idle_queues() {
    let (status, body) = get_json(state(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queues"].as_array().map(Vec::len), Some(3));
    assert!(body["lastJobProcessedAt"].is_null());
}

#[tokio::test]
async fn health_is_unavailable_when_a_queue_is_paused() {
    let state = state();
    state
        .queues
        .get(QueueClass::Content)
        .expect("content queue")
        .pause()
        .await;

    let (status, body) = get_json(state, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn openapi_document_lists_health() {
    let (status, body) = get_json(state(), "/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/health"].is_object());
}
