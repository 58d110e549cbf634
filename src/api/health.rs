//! Health check endpoints for eventsink
//!
//! Liveness only says the process is up. Readiness follows the lifecycle
//! state and the component checks refreshed by [`health_monitor`].

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::api::BUILD_INFO;
use crate::pipeline::{IngestionQueue, LifecycleState};
use crate::store::EventStore;

/// Queue fill ratio above which the pipeline reports itself degraded
const QUEUE_DEGRADED_RATIO: f64 = 0.9;

/// Health of the service or one of its components, ordered worst last
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but close to shedding load
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Degraded still serves, so it stays 200
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Last check of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            last_check: Utc::now(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Body of `/readyz`
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: HealthStatus,
    pub lifecycle: LifecycleState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: DateTime<Utc>,
}

/// Component checks plus the lifecycle they are read against
pub struct HealthState {
    components: RwLock<HashMap<String, ComponentHealth>>,
    lifecycle: watch::Receiver<LifecycleState>,
}

impl HealthState {
    pub fn new(lifecycle: watch::Receiver<LifecycleState>) -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            lifecycle,
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.borrow()
    }

    /// Replace the last check of a component
    pub async fn update_component(&self, name: impl Into<String>, health: ComponentHealth) {
        self.components.write().await.insert(name.into(), health);
    }

    pub async fn components(&self) -> HashMap<String, ComponentHealth> {
        self.components.read().await.clone()
    }

    /// Worst component status; unhealthy outside of `Running`
    pub async fn get_status(&self) -> HealthStatus {
        if self.lifecycle() != LifecycleState::Running {
            return HealthStatus::Unhealthy;
        }

        self.components
            .read()
            .await
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

/// Basic liveness check endpoint
///
/// Returns 200 OK if the service is alive.
/// This endpoint should be lightweight and not check external dependencies.
///
/// # Example
/// ```text
/// GET /healthz
/// ```
pub async fn health_check() -> Response {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Service is running".to_string()),
        timestamp: Utc::now(),
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// Readiness check endpoint
///
/// Ready only while the service is running and no component is unhealthy.
///
/// # Example
/// ```text
/// GET /readyz
/// ```
pub async fn ready_check(State(state): State<Arc<HealthState>>) -> Response {
    let components = state.components().await;
    let overall_status = state.get_status().await;

    let response = ReadyResponse {
        status: overall_status,
        lifecycle: state.lifecycle(),
        checks: components,
        timestamp: Utc::now(),
    };

    let status_code = overall_status.to_status_code();
    (status_code, Json(response)).into_response()
}

/// Build information endpoint
///
/// # Example
/// ```text
/// GET /build
/// ```
pub async fn build_info() -> Response {
    (StatusCode::OK, Json(&BUILD_INFO)).into_response()
}

/// Check store connectivity
pub async fn check_store_health(store: &dyn EventStore, timeout: Duration) -> ComponentHealth {
    match tokio::time::timeout(timeout, store.ping()).await {
        Ok(Ok(())) => ComponentHealth::new(
            HealthStatus::Healthy,
            format!("{} store reachable", store.backend_name()),
        ),
        Ok(Err(e)) => ComponentHealth::new(HealthStatus::Unhealthy, e.to_string()),
        Err(_) => ComponentHealth::new(
            HealthStatus::Unhealthy,
            format!("{} store ping timed out", store.backend_name()),
        ),
    }
}

/// Check how full the ingestion queue is
pub fn check_queue_health(queue: &IngestionQueue) -> ComponentHealth {
    let depth = queue.len();
    let capacity = queue.capacity();
    let ratio = depth as f64 / capacity.max(1) as f64;

    let status = if queue.is_closed() {
        HealthStatus::Unhealthy
    } else if ratio >= QUEUE_DEGRADED_RATIO {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    ComponentHealth::new(status, format!("{}/{} batches queued", depth, capacity))
}

/// Refresh component health every `interval` until `ct` is cancelled
pub async fn health_monitor(
    state: Arc<HealthState>,
    store: Arc<dyn EventStore>,
    queue: IngestionQueue,
    interval: Duration,
    ct: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ct.cancelled() => break,
            _ = ticker.tick() => {
                let store_health = check_store_health(store.as_ref(), interval).await;
                if !store_health.status.is_healthy() {
                    tracing::warn!(message = ?store_health.message, "Store health check failed");
                }
                state.update_component("store", store_health).await;
                state.update_component("queue", check_queue_health(&queue)).await;
            }
        }
    }

    tracing::debug!("Health monitor stopped");
}
