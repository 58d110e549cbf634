//! Service lifecycle
//!
//! Starts the pipeline in dependency order, serves HTTP until the shutdown
//! future resolves, then stops everything in reverse order. The current
//! state is published on a watch channel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::ingest::IngestService;
use super::memstats::report_memory;
use super::queue::IngestionQueue;
use super::stats::PipelineStats;
use super::writer::{DrainReport, WriterPool, WriterSettings};
use crate::api::{create_router, health_monitor, AppState, HealthState};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::schema::SchemaSource;
use crate::store::EventStore;

/// Where the service is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Everything started before serving
struct Running {
    ingest: IngestService,
    pool: WriterPool,
    health: Arc<HealthState>,
    ct: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

/// Owns startup and shutdown ordering
pub struct LifecycleCoordinator {
    config: Arc<Config>,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl LifecycleCoordinator {
    pub fn new(config: Arc<Config>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Follow state changes
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Lifecycle transition");
        }
    }

    /// Run the service until `shutdown` resolves
    ///
    /// Startup failures leave the state at `Stopped` and are returned before
    /// anything is served.
    pub async fn run<F>(
        &self,
        store: Arc<dyn EventStore>,
        schema: SchemaSource,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<DrainReport>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.transition(LifecycleState::Starting);

        let running = match self.start(Arc::clone(&store), &schema).await {
            Ok(running) => running,
            Err(e) => {
                crate::log_error!(e, "Startup failed");
                self.transition(LifecycleState::Stopped);
                return Err(e);
            },
        };

        let app_state = AppState {
            ingest: running.ingest.clone(),
            health: Arc::clone(&running.health),
            workers: running.pool.workers(),
        };
        let router = create_router(&self.config.server, app_state);

        let state = Arc::clone(&self.state);
        let signal = async move {
            shutdown.await;
            if state.send_replace(LifecycleState::ShuttingDown) != LifecycleState::ShuttingDown {
                info!("Shutdown requested, refusing new connections");
            }
        };

        match listener.local_addr() {
            Ok(address) => info!(address = %address, "HTTP server listening"),
            Err(e) => error!(error = %e, "Could not read listener address"),
        }
        self.transition(LifecycleState::Running);

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await;

        self.transition(LifecycleState::ShuttingDown);
        let report = self.stop(running).await;
        self.transition(LifecycleState::Stopped);

        served.map_err(|e| Error::internal(format!("Server error: {}", e)))?;
        Ok(report)
    }

    async fn start(&self, store: Arc<dyn EventStore>, schema: &SchemaSource) -> Result<Running> {
        let config = &self.config;
        let connect_timeout = config.store.connect_timeout();
        let collection = &config.store.collection;

        tokio::time::timeout(connect_timeout, store.ping())
            .await
            .map_err(|_| Error::startup("Store did not answer within the connect timeout"))?
            .map_err(|e| Error::startup(format!("Store unreachable: {}", e)))?;

        tokio::time::timeout(connect_timeout, store.ensure_collection(collection))
            .await
            .map_err(|_| Error::startup(format!("Timed out preparing collection {}", collection)))?
            .map_err(|e| Error::startup(format!("Could not prepare collection: {}", e)))?;

        info!(backend = store.backend_name(), collection = %collection, "Store ready");

        let validator = schema.load()?;
        info!(source = %schema.describe(), "Events schema loaded");

        let queue = IngestionQueue::new(config.ingestion.queue_capacity);
        let stats = Arc::new(PipelineStats::new());
        let pool = WriterPool::start(
            store.as_ref(),
            queue.clone(),
            Arc::clone(&stats),
            WriterSettings::from_config(config),
            config.ingestion.resolved_worker_count(),
        )
        .await?;

        let ingest = IngestService::new(
            queue.clone(),
            Arc::new(validator),
            stats,
            config.ingestion.enqueue_timeout(),
        );

        let ct = CancellationToken::new();
        let health = Arc::new(HealthState::new(self.subscribe()));
        let mut background = vec![tokio::spawn(health_monitor(
            Arc::clone(&health),
            store,
            queue,
            config.runtime.health_check_interval(),
            ct.clone(),
        ))];

        if let Some(interval) = config.runtime.memory_stats_interval() {
            background.push(tokio::spawn(report_memory(interval, ct.clone())));
        }

        Ok(Running {
            ingest,
            pool,
            health,
            ct,
            background,
        })
    }

    async fn stop(&self, running: Running) -> DrainReport {
        let Running {
            ingest,
            pool,
            ct,
            background,
            ..
        } = running;

        ingest.queue().close();
        let report = pool.shutdown(self.config.server.shutdown_grace()).await;

        ct.cancel();
        for task in background {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed");
            }
        }

        let stats = ingest.stats().snapshot();
        info!(
            finished = report.finished,
            aborted = report.aborted,
            batches_persisted = stats.batches_persisted,
            batches_failed = stats.batches_failed,
            "Shutdown complete"
        );

        report
    }
}
