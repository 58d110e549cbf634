//! Document store module for eventsink
//!
//! Events are persisted through two seams: an [`EventStore`] that handles
//! connectivity and hands out sessions, and a [`StoreSession`] owned by a
//! single writer worker for its whole life. A session does not pin a store
//! connection.

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::models::EventBatch;

// Re-export commonly used types
pub use error::{StoreError, StoreResult};
pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;

/// Connection to the document store
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend_name(&self) -> &'static str;

    /// Verify the store is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Create the collection if it does not exist yet
    async fn ensure_collection(&self, collection: &str) -> StoreResult<()>;

    /// Open a session for exclusive use by one worker
    async fn open_session(&self) -> StoreResult<Box<dyn StoreSession>>;
}

/// A worker's private handle on the store
#[async_trait]
pub trait StoreSession: Send {
    /// Write every event of the batch as one document, returns documents written
    async fn bulk_insert(&mut self, collection: &str, batch: &EventBatch) -> StoreResult<u64>;
}

/// Build the configured store
///
/// `sessions` is the number of writer sessions; it sizes the connection pool
/// up to `STORE_MAX_CONNECTIONS`.
pub fn connect(config: &StoreConfig, sessions: usize) -> Result<Arc<dyn EventStore>> {
    match config.backend()? {
        StoreBackend::Postgres => Ok(Arc::new(PgEventStore::new(config, sessions)?)),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, events will not survive a restart");
            Ok(Arc::new(MemoryEventStore::new()))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_config;

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let mut config = test_config().store;
        config.backend = "memory".to_string();

        let store = connect(&config, 2).unwrap();
        assert_eq!(store.backend_name(), "memory");
        store.ping().await.unwrap();
    }

    #[test]
    fn test_connect_unknown_backend() {
        let mut config = test_config().store;
        config.backend = "cassandra".to_string();

        assert!(connect(&config, 2).is_err());
    }
}
