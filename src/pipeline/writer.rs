//! Writer pool
//!
//! A fixed set of long-lived workers drains the ingestion queue. Each worker
//! owns one store session and bulk inserts one batch at a time. A failed
//! insert loses its batch; the worker logs it and takes the next one.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use super::queue::IngestionQueue;
use super::stats::PipelineStats;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::Stopwatch;
use crate::models::EventBatch;
use crate::store::{EventStore, StoreError, StoreResult, StoreSession};

/// Settings shared by every worker
#[derive(Debug, Clone)]
pub struct WriterSettings {
    /// Collection receiving every event
    pub collection: String,
    /// Upper bound on one bulk insert
    pub insert_timeout: Duration,
    /// Retries for a retryable insert failure, 0 disables retrying
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl WriterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection: config.store.collection.clone(),
            insert_timeout: config.store.insert_timeout(),
            max_retries: config.store.insert_max_retries,
            retry_base_delay: config.store.retry_base_delay(),
            retry_max_delay: config.store.retry_max_delay(),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.retry_base_delay,
            max_interval: self.retry_max_delay,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

/// How the pool stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Workers that finished on their own
    pub finished: usize,
    /// Workers force-stopped after the grace period
    pub aborted: usize,
}

impl DrainReport {
    /// Check if every worker finished draining in time
    pub fn is_clean(&self) -> bool {
        self.aborted == 0
    }
}

/// Running set of writer workers
pub struct WriterPool {
    handles: Vec<JoinHandle<()>>,
}

impl WriterPool {
    /// Open one session per worker, then spawn the workers
    ///
    /// Fails without spawning anything if any session cannot be opened.
    pub async fn start(
        store: &dyn EventStore,
        queue: IngestionQueue,
        stats: Arc<PipelineStats>,
        settings: WriterSettings,
        workers: usize,
    ) -> Result<Self> {
        let workers = workers.max(1);

        let mut sessions = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let session = store.open_session().await.map_err(|e| {
                Error::startup(format!(
                    "Writer {} could not open a store session: {}",
                    worker_id, e
                ))
            })?;
            sessions.push(session);
        }

        let settings = Arc::new(settings);
        let handles = sessions
            .into_iter()
            .enumerate()
            .map(|(id, session)| {
                let worker = Worker {
                    id,
                    session,
                    queue: queue.clone(),
                    stats: Arc::clone(&stats),
                    settings: Arc::clone(&settings),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            workers,
            collection = %settings.collection,
            max_retries = settings.max_retries,
            "Writer pool started"
        );

        Ok(Self { handles })
    }

    /// Number of workers started
    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Wait up to `grace` for workers to drain the closed queue
    ///
    /// Workers still running afterwards are aborted. Close the queue first,
    /// otherwise every worker is still waiting for work when the grace
    /// period ends.
    pub async fn shutdown(mut self, grace: Duration) -> DrainReport {
        let total = self.handles.len();

        let joined = tokio::time::timeout(
            grace,
            futures::future::join_all(self.handles.iter_mut()),
        )
        .await;

        if joined.is_ok() {
            info!(workers = total, "Writer pool drained");
            return DrainReport {
                finished: total,
                aborted: 0,
            };
        }

        let mut aborted = 0;
        for handle in &self.handles {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }

        warn!(
            aborted,
            grace_ms = grace.as_millis() as u64,
            "Writer pool did not drain in time, remaining workers stopped"
        );

        DrainReport {
            finished: total - aborted,
            aborted,
        }
    }
}

struct Worker {
    id: usize,
    session: Box<dyn StoreSession>,
    queue: IngestionQueue,
    stats: Arc<PipelineStats>,
    settings: Arc<WriterSettings>,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker_id = self.id, "Writer started");

        while let Some(batch) = self.queue.dequeue().await {
            self.write_batch(batch).await;
        }

        debug!(worker_id = self.id, "Writer stopped, queue closed and drained");
    }

    async fn write_batch(&mut self, batch: EventBatch) {
        let span = crate::store_span!("bulk_insert", self.id);
        span.record("batch_id", tracing::field::display(batch.id));
        span.record("documents", batch.len() as u64);

        let stopwatch = Stopwatch::start();
        let result = self.insert_with_retry(&batch).instrument(span.clone()).await;
        stopwatch.record(&span);

        match result {
            Ok(inserted) => {
                self.stats.record_persisted(inserted);
                span.in_scope(|| debug!(inserted, "Batch persisted"));
            },
            Err(e) => {
                self.stats.record_failed();
                span.in_scope(|| {
                    crate::log_error!(
                        e,
                        "Failed to persist batch, events lost",
                        batch_id = batch.id,
                        events = batch.len(),
                    )
                });
            },
        }
    }

    async fn insert_with_retry(&mut self, batch: &EventBatch) -> StoreResult<u64> {
        let max_retries = self.settings.max_retries;
        let mut backoff = self.settings.backoff();
        let mut attempt = 0;

        loop {
            match self.insert_once(batch).await {
                Ok(inserted) => return Ok(inserted),
                Err(e) if attempt < max_retries && e.is_retryable() => {
                    attempt += 1;
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.settings.retry_max_delay);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying bulk insert"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// One bounded insert attempt; a panic inside the store counts as a failure
    async fn insert_once(&mut self, batch: &EventBatch) -> StoreResult<u64> {
        let timeout = self.settings.insert_timeout;
        let insert = self.session.bulk_insert(&self.settings.collection, batch);

        match AssertUnwindSafe(tokio::time::timeout(timeout, insert))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StoreError::Timeout(format!(
                "bulk insert exceeded {}ms",
                timeout.as_millis()
            ))),
            Err(panic) => Err(StoreError::QueryExecution(format!(
                "bulk insert panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
