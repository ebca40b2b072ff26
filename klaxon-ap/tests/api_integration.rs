//! Integration tests for the klaxon-ap HTTP API
//!
//! Exercises the router in-process with `tower::ServiceExt::oneshot`.

mod helpers;

use axum::http::StatusCode;
use helpers::{config, RecordingOutput};
use klaxon_ap::api::{create_router, AppState};
use klaxon_ap::{AlertEngine, SharedState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const API_CONFIG: &str = r#"
[pools.pair]
sounds = [{ sound = "a" }, { sound = "b" }]

[[chains.slow.steps]]
sound = "a"
delay_before_ms = 60000

[[monitors]]
key = "disk"
thresholds = { kind = "numeric", warning = 80, critical = 95 }
alerts = { warning = "warn", critical = "crit" }
"#;

/// Test helper to create a router over a fresh engine
fn setup_test_server() -> (axum::Router, Arc<AlertEngine>) {
    let output = Arc::new(RecordingOutput::new(Duration::ZERO));
    let engine = Arc::new(AlertEngine::with_seed(
        &config(API_CONFIG),
        output,
        Arc::new(SharedState::new()),
        5,
    ));
    engine.start();

    let app_state = AppState {
        engine: Arc::clone(&engine),
        port: 5750,
    };
    (create_router(app_state), engine)
}

/// Helper function to make HTTP requests to the test router
async fn make_request(
    app: &axum::Router,
    method: &str,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Option<Value>) {
    use axum::body::Body;
    use http::{Method, Request};
    use tower::ServiceExt;

    let method = match method {
        "GET" => Method::GET,
        "POST" => Method::POST,
        _ => panic!("Unsupported method"),
    };

    let request = Request::builder().method(method).uri(path);
    let request = match body {
        Some(json_body) => request
            .header("content-type", "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json_body = if !body.is_empty() {
        Some(serde_json::from_slice(&body).unwrap())
    } else {
        None
    };

    (status, json_body)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = setup_test_server();

    let (status, body) = make_request(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    let body = body.expect("Expected response body");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "klaxon-ap");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_snapshot_ingestion_and_status() {
    let (app, engine) = setup_test_server();

    let (status, body) = make_request(
        &app,
        "POST",
        "/api/v1/snapshots",
        Some(json!([
            { "key": "disk", "value": 70 },
            { "key": "disk", "value": 85.5 }
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["accepted"], 2);
    let outcomes = body["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["outcome"], "dispatched");
    assert_eq!(outcomes[0]["tier"], "warning");
    assert_eq!(outcomes[0]["sound"], "warn");

    // Single object form
    let (status, body) = make_request(
        &app,
        "POST",
        "/api/v1/snapshots",
        Some(json!({ "key": "disk", "value": 99 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["outcomes"][0]["tier"], "critical");

    engine.dispatcher().idle().await;
    let (status, body) = make_request(&app, "GET", "/api/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["counters"]["snapshots"], 3);
    assert_eq!(body["counters"]["played"], 2);
    assert_eq!(body["tracked_keys"], 1);
    assert_eq!(body["port"], 5750);
}

#[tokio::test]
async fn test_invalid_snapshots_rejected() {
    let (app, _) = setup_test_server();

    let (status, _) = make_request(
        &app,
        "POST",
        "/api/v1/snapshots",
        Some(json!({ "key": "disk" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = make_request(
        &app,
        "POST",
        "/api/v1/snapshots",
        Some(json!({ "key": " ", "value": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.unwrap()["status"].as_str().unwrap().contains("empty key"));
}

#[tokio::test]
async fn test_chain_run_and_stop() {
    let (app, engine) = setup_test_server();

    let (status, body) = make_request(&app, "POST", "/api/v1/chains/slow/run", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body.unwrap()["chain_id"], "slow");

    let (status, _) = make_request(&app, "POST", "/api/v1/chains/slow/run", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = make_request(&app, "GET", "/api/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["running_chains"], json!(["slow"]));

    let (status, body) = make_request(&app, "POST", "/api/v1/chains/slow/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["status"], "stopping");

    for _ in 0..100 {
        if engine.sequencer().running().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let (status, _) = make_request(&app, "POST", "/api/v1/chains/slow/stop", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = make_request(&app, "POST", "/api/v1/chains/nope/run", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pool_test_endpoint() {
    let (app, engine) = setup_test_server();

    let (status, body) = make_request(&app, "GET", "/api/v1/pools/pair/test", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["pool_id"], "pair");
    let sound = body["sound"].as_str().unwrap();
    assert!(sound == "a" || sound == "b");
    assert!(body.get("request_id").is_none());

    let (status, body) = make_request(&app, "GET", "/api/v1/pools/pair/test?play=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.unwrap()["request_id"].is_u64());
    engine.dispatcher().idle().await;
    assert_eq!(engine.state().counters().played, 1);

    let (status, body) = make_request(&app, "GET", "/api/v1/pools/nope/test", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.unwrap()["status"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_event_stream_headers() {
    use axum::body::Body;
    use http::Request;
    use tower::ServiceExt;

    let (app, _) = setup_test_server();
    let request = Request::builder()
        .uri("/api/v1/events")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}
