//! Integration tests for eventsink
//!
//! These tests drive the router in-process and verify the HTTP contract of
//! every endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use eventsink::{
    api::server::create_router,
    config::{Config, ServerConfig},
    test_utils::{app_state, raw_event, test_config, track_payload},
    IngestionQueue,
};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn test_app(config: &Config) -> (Router, IngestionQueue) {
    let (state, queue) = app_state(config);
    (create_router(&config.server, state), queue)
}

async fn post_track(app: Router, body: impl Into<Body>) -> Response {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri("/v1/track")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap(),
    )
    .await
    .unwrap()
}

async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_track_accepts_valid_events() {
    let (app, queue) = test_app(&test_config());

    let payload = track_payload(vec![raw_event("a"), raw_event("b")]);
    let response = post_track(app, payload.to_string()).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());

    let batch = queue.dequeue().await.unwrap();
    assert_eq!(batch.len(), 2);
}

#[tokio::test]
async fn test_track_malformed_json_is_bad_request() {
    let (app, queue) = test_app(&test_config());

    let response = post_track(app, "{\"events\": [").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["type"], "validation_error");
    assert_eq!(json["error"]["status"], 400);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_track_wrong_shapes_are_bad_requests() {
    let config = test_config();

    for payload in [
        json!([raw_event("a")]),
        json!({"event": [raw_event("a")]}),
        json!({"events": "click"}),
    ] {
        let (app, queue) = test_app(&config);
        let response = post_track(app, payload.to_string()).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", payload);
        assert!(queue.is_empty());
    }
}

#[tokio::test]
async fn test_track_overloaded_is_internal_error() {
    let mut config = test_config();
    config.ingestion.queue_capacity = 1;
    config.ingestion.enqueue_timeout_ms = 50;
    let (app, queue) = test_app(&config);

    let first = post_track(app.clone(), track_payload(vec![raw_event("a")]).to_string()).await;
    assert_eq!(first.status(), StatusCode::NO_CONTENT);

    let second = post_track(app, track_payload(vec![raw_event("b")]).to_string()).await;
    assert_eq!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(second).await;
    assert_eq!(json["error"]["type"], "overloaded");

    assert_eq!(queue.len(), 1);
    assert_eq!(queue.dequeue().await.unwrap().events[0].session_id, "a");
}

#[tokio::test]
async fn test_track_after_queue_closed_is_unavailable() {
    let (app, queue) = test_app(&test_config());
    queue.close();

    let response = post_track(app, track_payload(vec![raw_event("a")]).to_string()).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_track_requires_post() {
    let (app, _queue) = test_app(&test_config());

    let response = get(app, "/v1/track").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let (app, _queue) = test_app(&test_config());
    let response = get(app, "/healthz").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["message"].is_string());
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_ready_endpoint_returns_ok() {
    let (app, _queue) = test_app(&test_config());
    let response = get(app, "/readyz").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["lifecycle"], "running");
    assert!(json["checks"].is_object());
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_build_info_endpoint() {
    let (app, _queue) = test_app(&test_config());
    let response = get(app, "/build").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert!(json["version"].is_string());
    assert!(json["commit"].is_string());
    assert!(json["build_time"].is_string());
    assert!(json["rust_version"].is_string());
}

#[tokio::test]
async fn test_root_says_hello() {
    let (app, _queue) = test_app(&test_config());
    let response = get(app, "/").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"hello world!\n");
}

#[tokio::test]
async fn test_metrics_endpoint_when_enabled() {
    let (app, _queue) = test_app(&test_config());

    let accepted = post_track(app.clone(), track_payload(vec![raw_event("a")]).to_string()).await;
    assert_eq!(accepted.status(), StatusCode::NO_CONTENT);

    let response = get(app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body_str = String::from_utf8(body.to_vec()).unwrap();

    // Check for Prometheus format
    assert!(body_str.contains("# HELP"));
    assert!(body_str.contains("# TYPE"));
    assert!(body_str.contains("eventsink_batches_accepted_total 1\n"));
    assert!(body_str.contains("eventsink_queue_depth 1\n"));
}

#[tokio::test]
async fn test_metrics_endpoint_when_disabled() {
    let mut config = test_config();
    config.server.metrics_enabled = false;
    let (app, _queue) = test_app(&config);

    let response = get(app, "/metrics").await;

    // Should return 404 when metrics are disabled
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_request_id_and_runtime_headers_are_set() {
    let (app, _queue) = test_app(&test_config());

    let response = post_track(app, track_payload(vec![raw_event("a")]).to_string()).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let request_id = response.headers().get("x-request-id").unwrap();
    assert_eq!(request_id.to_str().unwrap().len(), 36);
    assert!(response.headers().contains_key("x-runtime"));
}

#[tokio::test]
async fn test_cors_headers_are_set() {
    let (app, _queue) = test_app(&test_config());

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/v1/track")
                .header("Origin", "http://example.com")
                .header("Access-Control-Request-Method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("access-control-allow-origin"));
    assert!(response.headers().contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn test_unknown_endpoint_returns_404() {
    let (app, _queue) = test_app(&test_config());
    let response = get(app, "/unknown/endpoint").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_config_validation() {
    let mut config = test_config();
    assert!(config.validate().is_ok());

    // Invalid port
    config.server.port = 0;
    assert!(config.validate().is_err());

    // Empty store URL
    config.server.port = 3000;
    config.store.url = String::new();
    assert!(config.validate().is_err());

    // Collection name that is not an identifier
    config.store.url = "postgresql://localhost/db".to_string();
    config.store.collection = "events; drop".to_string();
    assert!(config.validate().is_err());

    // Zero queue capacity
    config.store.collection = "events".to_string();
    config.ingestion.queue_capacity = 0;
    assert!(config.validate().is_err());

    // Zero enqueue timeout
    config.ingestion.queue_capacity = 100;
    config.ingestion.enqueue_timeout_ms = 0;
    assert!(config.validate().is_err());

    // Unknown backend
    config.ingestion.enqueue_timeout_ms = 1000;
    config.store.backend = "redis".to_string();
    assert!(config.validate().is_err());

    config.store.backend = "postgres".to_string();
    assert!(config.validate().is_ok());
}

#[test]
fn test_server_address_parsing() {
    let config = ServerConfig {
        host: "0.0.0.0".to_string(),
        port: 3000,
        log_level: "info".to_string(),
        environment: "production".to_string(),
        request_timeout_secs: 30,
        shutdown_grace_secs: 5,
        metrics_enabled: true,
    };

    assert_eq!(config.address(), "0.0.0.0:3000");
    assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    assert!(!config.is_development());
    assert!(config.is_production());
}
