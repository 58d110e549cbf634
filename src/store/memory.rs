//! In-memory document store
//!
//! Used for local development (`STORE_BACKEND=memory`) and throughout the
//! test suite. Latency, insert failures, insert panics and an unreachable
//! store can all be injected at runtime.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{EventStore, StoreError, StoreResult, StoreSession};
use crate::models::EventBatch;

#[derive(Debug, Default)]
struct Inner {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    insert_delay: Mutex<Duration>,
    failures_pending: AtomicUsize,
    panics_pending: AtomicUsize,
    unreachable: AtomicBool,
    sessions_opened: AtomicUsize,
    inserts_attempted: AtomicUsize,
}

/// Process-local [`EventStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    inner: Arc<Inner>,
}

impl MemoryEventStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every bulk insert take at least `delay`
    pub fn with_insert_delay(self, delay: Duration) -> Self {
        self.set_insert_delay(delay);
        self
    }

    /// Change the insert delay
    pub fn set_insert_delay(&self, delay: Duration) {
        *lock(&self.inner.insert_delay) = delay;
    }

    /// Fail the next `count` bulk inserts
    pub fn fail_next_inserts(&self, count: usize) {
        self.inner.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Panic inside the next `count` bulk inserts
    pub fn panic_next_inserts(&self, count: usize) {
        self.inner.panics_pending.store(count, Ordering::SeqCst);
    }

    /// Make ping, collection setup and session opening fail
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Snapshot of the documents stored in a collection
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        lock(&self.inner.collections)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of documents stored in a collection
    pub fn document_count(&self, collection: &str) -> usize {
        lock(&self.inner.collections)
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Check if a collection has been created
    pub fn has_collection(&self, collection: &str) -> bool {
        lock(&self.inner.collections).contains_key(collection)
    }

    /// Number of sessions handed out so far
    pub fn sessions_opened(&self) -> usize {
        self.inner.sessions_opened.load(Ordering::SeqCst)
    }

    /// Number of bulk inserts attempted, successful or not
    pub fn inserts_attempted(&self) -> usize {
        self.inner.inserts_attempted.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("memory store marked unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_reachable()
    }

    async fn ensure_collection(&self, collection: &str) -> StoreResult<()> {
        self.check_reachable()?;
        lock(&self.inner.collections)
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn open_session(&self) -> StoreResult<Box<dyn StoreSession>> {
        self.check_reachable()?;
        self.inner.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// Session on a [`MemoryEventStore`]
#[derive(Debug)]
pub struct MemorySession {
    inner: Arc<Inner>,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn bulk_insert(&mut self, collection: &str, batch: &EventBatch) -> StoreResult<u64> {
        self.inner.inserts_attempted.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.inner.insert_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.inner.panics_pending) {
            panic!("injected panic while inserting batch {}", batch.id);
        }

        if take_one(&self.inner.failures_pending) {
            return Err(StoreError::QueryExecution(format!(
                "injected failure for batch {}",
                batch.id
            )));
        }

        let documents = batch
            .iter()
            .map(|event| event.to_document())
            .collect::<Result<Vec<_>, _>>()?;
        let inserted = documents.len() as u64;

        lock(&self.inner.collections)
            .entry(collection.to_string())
            .or_default()
            .extend(documents);

        Ok(inserted)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decrement a pending-injection counter, returns true if one was consumed
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
