//! HTTP server implementation for eventsink
//!
//! This module sets up the Axum router with all routes and middleware, and
//! the signal future that starts a graceful shutdown.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::time::Instant;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use uuid::Uuid;

use crate::{
    api::{
        health::{build_info, health_check, ready_check},
        track::track_events,
        AppState, TRACK_PATH,
    },
    config::ServerConfig,
    pipeline::PipelineGauges,
};

/// Request id header set on every request and response
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Handling time header, in seconds with microsecond precision
pub const RUNTIME_HEADER: &str = "x-runtime";

/// Request ID generator
#[derive(Clone, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(id.parse().ok()?))
    }
}

/// Create the main application router
pub fn create_router(config: &ServerConfig, state: AppState) -> Router {
    let mut app = Router::new()
        .route(TRACK_PATH, post(track_events))
        .route("/healthz", get(health_check))
        .route("/readyz", get(ready_check))
        .route("/build", get(build_info))
        .route("/", get(hello));

    if config.metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    // Layers wrap outward: the request id is set before tracing and timing see the request
    app.with_state(state)
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    let matched_path =
                        request.extensions().get::<MatchedPath>().map(MatchedPath::as_str);
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");

                    tracing::info_span!(
                        "http_request",
                        method = ?request.method(),
                        matched_path,
                        request_id,
                        latency = tracing::field::Empty,
                        status = tracing::field::Empty,
                    )
                })
                .on_request(DefaultOnRequest::new().level(tracing::Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(tracing::Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .layer(middleware::from_fn(record_runtime))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

/// Stamp every response with the time spent handling it
async fn record_runtime(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = request.uri().path().to_owned();

    let mut response = next.run(request).await;

    let seconds = start.elapsed().as_secs_f64();
    if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", seconds)) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(RUNTIME_HEADER), value);
    }
    tracing::debug!(path = %path, seconds, "Request has finished");

    response
}

async fn hello() -> &'static str {
    "hello world!\n"
}

/// Metrics endpoint handler
async fn metrics_handler(State(state): State<AppState>) -> String {
    let queue = state.ingest.queue();
    state.stats().render_prometheus(PipelineGauges {
        queue_depth: queue.len(),
        queue_capacity: queue.capacity(),
        workers: state.workers,
    })
}

/// Shutdown signal handler
///
/// Resolves on CTRL+C, SIGTERM or SIGQUIT. A handler that cannot be
/// installed is logged and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let unix_signal = |kind: tokio::signal::unix::SignalKind, name: &'static str| async move {
        match tokio::signal::unix::signal(kind) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, signal = name, "Failed to install signal handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(tokio::signal::unix::SignalKind::terminate(), "SIGTERM");
    #[cfg(unix)]
    let quit = unix_signal(tokio::signal::unix::SignalKind::quit(), "SIGQUIT");

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received CTRL+C, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
        _ = quit => {
            tracing::info!("Received SIGQUIT, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{app_state, test_config};
    use axum::body::Body;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    async fn get_request(app: Router, uri: &str) -> Response {
        app.oneshot(
            axum::http::Request::builder()
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let config = test_config();
        let (state, _queue) = app_state(&config);
        let response = get_request(create_router(&config.server, state), "/healthz").await;

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_build_endpoint() {
        let config = test_config();
        let (state, _queue) = app_state(&config);
        let response = get_request(create_router(&config.server, state), "/build").await;

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_runtime_and_request_id_headers() {
        let config = test_config();
        let (state, _queue) = app_state(&config);
        let response = get_request(create_router(&config.server, state), "/").await;

        assert_eq!(response.status(), StatusCode::OK);

        let runtime = response.headers().get(RUNTIME_HEADER).unwrap().to_str().unwrap();
        let (_, fraction) = runtime.split_once('.').unwrap();
        assert_eq!(fraction.len(), 6);
        assert!(runtime.parse::<f64>().unwrap() >= 0.0);

        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_metrics_can_be_disabled() {
        let mut config = test_config();
        config.server.metrics_enabled = false;
        let (state, _queue) = app_state(&config);
        let response = get_request(create_router(&config.server, state), "/metrics").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
