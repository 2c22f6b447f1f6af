//! Integration tests for the HTTP surface.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, post_json, Harness};
use serde_json::json;

// ---------------------------------------------------------------------------
// Test: GET /health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_degraded_before_first_load() {
    let h = Harness::new();
    let response = get(h.app(), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["pipeline_state"], "unloaded");
    assert_eq!(json["loads"], 0);
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn health_reports_ready_pipeline_and_counters() {
    let h = Harness::new();
    drop(h.manager.acquire().await.unwrap());

    let json = body_json(get(h.app(), "/health").await).await;

    assert_eq!(json["status"], "ok");
    assert_eq!(json["pipeline_state"], "ready");
    assert_eq!(json["loads"], 1);
    assert_eq!(json["resets"], 0);
    assert_eq!(json["generator_rebuilds"], 0);
    assert_eq!(json["full_rebuilds"], 0);
}

#[tokio::test]
async fn health_does_not_wait_for_a_running_job() {
    let h = Harness::new();
    let _lease = h.manager.acquire().await.unwrap();

    let response = tokio::time::timeout(std::time::Duration::from_secs(5), get(h.app(), "/health"))
        .await
        .expect("health blocked on the pipeline lease");

    assert_eq!(response.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Test: request id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let h = Harness::new();
    let response = get(h.app(), "/health").await;

    let request_id = response.headers().get("x-request-id");
    assert!(request_id.is_some(), "Response must contain an x-request-id header");
    assert_eq!(request_id.unwrap().to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let h = Harness::new();
    let response = get(h.app(), "/this-route-does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: POST /runsync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn runsync_completes_job() {
    let h = Harness::new();
    let response = post_json(
        h.app(),
        "/runsync",
        json!({ "id": "abc", "input": { "settings": { "prompts": "a", "max_frames": 3 } } }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], "abc");
    assert_eq!(json["status"], "COMPLETED");
    assert!(json["output"]["video"].is_string());
    assert!(json["output"].get("error").is_none());
}

#[tokio::test]
async fn runsync_assigns_id_when_missing() {
    let h = Harness::new();
    let json = body_json(post_json(h.app(), "/runsync", json!({ "input": { "prompts": "a" } })).await).await;

    assert_eq!(json["status"], "COMPLETED");
    assert_eq!(json["id"].as_str().unwrap().len(), 36);
}

#[tokio::test]
async fn runsync_failure_is_200_with_typed_output() {
    let h = Harness::new();
    let json = body_json(post_json(h.app(), "/runsync", json!({ "input": "not an object" })).await).await;

    assert_eq!(json["status"], "FAILED");
    assert_eq!(json["output"]["error"], "InvalidInput");
    assert!(json["output"].get("video").is_none());
}

#[tokio::test]
async fn runsync_rejects_malformed_body() {
    let h = Harness::new();
    let response = post_json(h.app(), "/runsync", json!(42)).await;
    assert!(response.status().is_client_error());
}
