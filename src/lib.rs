//! eventsink Library
//!
//! This library exposes the core modules of eventsink for use in integration tests
//! and by the `eventsink` binary.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use error::{Error, Result};

// Re-export model types
pub use models::{
    EventBatch, EventNormalizer, NormalizedEvent, RawEvent, ValidationError, ValidationErrorKind,
};

// Re-export pipeline types
pub use pipeline::{
    DrainReport, EnqueueOutcome, IngestService, IngestionQueue, LifecycleCoordinator,
    LifecycleState, WriterPool,
};

// Re-export API server functions
pub use api::server::{create_router, shutdown_signal};

// Re-export health check types
pub use api::{
    AppState, BuildInfo, ComponentHealth, HealthResponse, HealthState, HealthStatus,
    ReadyResponse,
};

pub use schema::{SchemaSource, SchemaValidator};
pub use store::{EventStore, MemoryEventStore, PgEventStore, StoreSession};
