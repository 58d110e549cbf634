//! HTTP surface of eventsink
//!
//! `POST /v1/track` feeds the pipeline; everything else is operational:
//! liveness, readiness, build information and Prometheus metrics.

use axum::extract::FromRef;
use serde::Serialize;
use std::sync::Arc;

use crate::pipeline::{IngestService, PipelineStats};

pub mod health;
pub mod server;
pub mod track;

pub use health::{
    build_info, health_check, health_monitor, ready_check, ComponentHealth, HealthResponse,
    HealthState, HealthStatus, ReadyResponse,
};
pub use server::{create_router, shutdown_signal};
pub use track::track_events;

/// Event submission endpoint
pub const TRACK_PATH: &str = "/v1/track";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestService,
    pub health: Arc<HealthState>,
    /// Writer workers started, reported at `/metrics`
    pub workers: usize,
}

impl AppState {
    pub fn stats(&self) -> &Arc<PipelineStats> {
        self.ingest.stats()
    }
}

impl FromRef<AppState> for Arc<HealthState> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.health)
    }
}

impl FromRef<AppState> for IngestService {
    fn from_ref(state: &AppState) -> Self {
        state.ingest.clone()
    }
}

/// Served at `/build`; fields not injected at compile time read "unknown"
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit: &'static str,
    pub build_time: &'static str,
    pub rust_version: &'static str,
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
    version: env!("CARGO_PKG_VERSION"),
    commit: or_unknown(option_env!("GIT_COMMIT")),
    build_time: or_unknown(option_env!("BUILD_TIME")),
    rust_version: or_unknown(option_env!("RUSTC_VERSION")),
};

const fn or_unknown(value: Option<&'static str>) -> &'static str {
    match value {
        Some(value) => value,
        None => "unknown",
    }
}
