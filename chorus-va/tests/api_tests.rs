//! HTTP API tests
//!
//! Drive the router with `oneshot` requests against a real service.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chorus_va::{build_router, AppState};
use helpers::{melody, TestHarness};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn router(harness: &TestHarness) -> Router {
    build_router(AppState::new(
        harness.pool.clone(),
        harness.event_bus.clone(),
        harness.service.clone(),
    ))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_reports_ok() {
    let harness = TestHarness::with_defaults().await;

    let (status, body) = send(router(&harness), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "chorus-va");
    assert_eq!(body["database"], "ok");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_prepare_reference_is_accepted_and_readable() {
    let harness = TestHarness::with_defaults().await;
    let track = harness.write_audio("reference.wav", &melody());

    let (status, body) = send(
        router(&harness),
        post_json(
            "/references",
            json!({
                "song_id": "ubi-caritas",
                "voice_part": "soprano",
                "source_track_ref": track,
                "needs_isolation": false,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "PENDING");
    let reference_id: Uuid = body["reference_id"].as_str().unwrap().parse().unwrap();

    // Repeating the request returns the same reference
    let (status, again) = send(
        router(&harness),
        post_json(
            "/references",
            json!({
                "song_id": "ubi-caritas",
                "voice_part": "soprano",
                "source_track_ref": track,
                "needs_isolation": false,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(again["reference_id"], body["reference_id"]);

    harness.wait_for_reference(reference_id).await;
    let (status, body) = send(router(&harness), get(&format!("/references/{}", reference_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "READY");
    assert_eq!(body["song_id"], "ubi-caritas");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unknown_reference_is_not_found() {
    let harness = TestHarness::with_defaults().await;

    let (status, body) = send(router(&harness), get(&format!("/references/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_reprocess_without_reference_is_not_found() {
    let harness = TestHarness::with_defaults().await;

    let (status, body) = send(
        router(&harness),
        post_json(
            "/references/reprocess",
            json!({ "song_id": "never-prepared", "voice_part": "tenor" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_blank_user_is_bad_request() {
    let harness = TestHarness::with_defaults().await;

    let (status, body) = send(
        router(&harness),
        post_json(
            "/analyses",
            json!({
                "user_id": "",
                "song_id": "ubi-caritas",
                "voice_part": "alto",
                "recording_ref": "recordings/take.wav",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_analysis_round_trip_over_http() {
    let harness = TestHarness::with_defaults().await;
    let track = harness.write_audio("reference.wav", &melody());
    let recording = harness.write_audio("take.wav", &melody());

    let (status, _) = send(
        router(&harness),
        post_json(
            "/references",
            json!({
                "song_id": "ubi-caritas",
                "voice_part": "alto",
                "source_track_ref": track,
                "needs_isolation": false,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(
        router(&harness),
        post_json(
            "/analyses",
            json!({
                "user_id": "alto-4",
                "song_id": "ubi-caritas",
                "voice_part": "alto",
                "recording_ref": recording,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "PENDING");
    let attempt_id: Uuid = body["attempt_id"].as_str().unwrap().parse().unwrap();

    harness.wait_for_attempt(attempt_id).await;

    let (status, body) = send(router(&harness), get(&format!("/analyses/{}", attempt_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "READY");
    assert!(body["scores"]["overall"].as_f64().unwrap() > 90.0);
    assert!(body["tips"].as_array().map(|t| !t.is_empty()).unwrap_or(false));
    assert!(body.get("error").is_none());

    let (status, body) = send(router(&harness), get("/users/alto-4/analyses?limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "alto-4");
    let listed = body["attempts"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["attempt_id"], attempt_id.to_string());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unknown_analysis_is_not_found() {
    let harness = TestHarness::with_defaults().await;

    let (status, body) = send(router(&harness), get(&format!("/analyses/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_zero_limit_is_bad_request() {
    let harness = TestHarness::with_defaults().await;

    let (status, body) = send(router(&harness), get("/users/alto-4/analyses?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    harness.shutdown().await;
}
