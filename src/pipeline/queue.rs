//! Bounded ingestion queue
//!
//! A single tokio mpsc channel carries batches from request handlers to the
//! writer pool. Producers wait at most the enqueue timeout for a free slot.
//! Every worker shares the one receiver behind an async mutex, so each batch
//! is handed to exactly one worker in FIFO order.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use crate::models::EventBatch;

/// Why a batch was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No slot freed up before the timeout
    Overloaded,
    /// The queue was closed for shutdown
    Closed,
}

/// Result of an enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted)
    }
}

struct Inner {
    sender: Mutex<Option<mpsc::Sender<EventBatch>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<EventBatch>>,
    capacity: usize,
}

/// Handle on the shared queue, cheap to clone
#[derive(Clone)]
pub struct IngestionQueue {
    inner: Arc<Inner>,
}

impl IngestionQueue {
    /// Create a queue holding at most `capacity` batches
    ///
    /// # Panics
    /// Panics if `capacity` is zero; configuration validation rejects that.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                receiver: tokio::sync::Mutex::new(receiver),
                capacity,
            }),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<EventBatch>> {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Offer a batch, waiting at most `timeout` for a free slot
    ///
    /// Returns immediately when the queue has room. A rejected batch is
    /// dropped.
    pub async fn enqueue(&self, batch: EventBatch, timeout: Duration) -> EnqueueOutcome {
        let Some(sender) = self.sender() else {
            return EnqueueOutcome::Rejected(RejectReason::Closed);
        };

        match sender.send_timeout(batch, timeout).await {
            Ok(()) => EnqueueOutcome::Accepted,
            Err(SendTimeoutError::Timeout(_)) => {
                EnqueueOutcome::Rejected(RejectReason::Overloaded)
            },
            Err(SendTimeoutError::Closed(_)) => EnqueueOutcome::Rejected(RejectReason::Closed),
        }
    }

    /// Take the next batch, waiting until one is available
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<EventBatch> {
        self.inner.receiver.lock().await.recv().await
    }

    /// Stop accepting batches; queued batches stay available to `dequeue`
    ///
    /// Returns the number of batches pending at the moment of closing, 0 if
    /// the queue was already closed.
    pub fn close(&self) -> usize {
        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(sender) = sender else {
            return 0;
        };

        // Measured on the sender: an idle worker holds the receiver lock
        let pending = sender.max_capacity() - sender.capacity();
        drop(sender);

        tracing::info!(pending, "Ingestion queue closed");
        pending
    }

    /// Check if the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Number of batches waiting
    pub fn len(&self) -> usize {
        match self.sender() {
            Some(sender) => sender.max_capacity() - sender.capacity(),
            None => self
                .inner
                .receiver
                .try_lock()
                .map(|receiver| receiver.len())
                .unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of waiting batches
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl std::fmt::Debug for IngestionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionQueue")
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
