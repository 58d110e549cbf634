//! eventsink - HTTP analytics event ingestion
//!
//! Accepts batches of client events over HTTP, queues them in a bounded
//! in-memory queue and persists them to a document store from a pool of
//! writer workers.

use std::sync::Arc;
use tokio::net::TcpListener;

use eventsink::{
    config::Config,
    error::{Error, Result},
    logging, shutdown_signal, store, LifecycleCoordinator, SchemaSource,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = Arc::new(Config::from_env()?);

    // Validate configuration
    config.validate()?;

    // Initialize logging/tracing
    logging::init_tracing(&config.server)?;

    // Log configuration (with sensitive data masked)
    config.log_config();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting eventsink");

    let workers = config.ingestion.resolved_worker_count();
    let store = store::connect(&config.store, workers)?;
    let schema = SchemaSource::File(config.runtime.resolved_schema_path()?);

    let address = config.server.address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| Error::startup(format!("Failed to bind to {}: {}", address, e)))?;

    let coordinator = LifecycleCoordinator::new(Arc::clone(&config));
    let report = coordinator
        .run(store, schema, listener, shutdown_signal())
        .await?;

    tracing::info!(
        drained = report.is_clean(),
        aborted = report.aborted,
        "eventsink shutdown complete"
    );
    Ok(())
}
