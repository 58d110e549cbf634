//! PostgreSQL document store
//!
//! Each collection is a table holding the full event document as JSONB plus
//! a few indexed projections. A writer session owns no connection of its
//! own: every bulk insert checks one out of the shared pool, so the worker
//! count is not bounded by the server's connection limit.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Connection, Postgres, QueryBuilder};
use std::str::FromStr;
use std::time::Duration;

use super::{EventStore, StoreError, StoreResult, StoreSession};
use crate::config::{is_valid_collection_name, StoreConfig};
use crate::error::{Error, Result};
use crate::models::EventBatch;

/// Columns bound per inserted row
const BINDS_PER_ROW: usize = 5;

/// PostgreSQL caps a statement at 65535 bind parameters
const MAX_ROWS_PER_STATEMENT: usize = 65535 / BINDS_PER_ROW;

/// PostgreSQL-backed [`EventStore`]
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    connect_timeout: Duration,
    max_connections: u32,
}

impl PgEventStore {
    /// Create a store for the configured URL
    ///
    /// The pool connects lazily; call [`EventStore::ping`] to verify the
    /// store is reachable. The pool holds one connection per writer session
    /// plus one for pings and schema setup, capped at `max_connections`.
    pub fn new(config: &StoreConfig, sessions: usize) -> Result<Self> {
        let connect_options = PgConnectOptions::from_str(&config.url)
            .map_err(|e| Error::config(format!("Invalid store URL: {}", e)))?
            .application_name("eventsink")
            .statement_cache_capacity(100);

        let max_connections = u32::try_from(sessions.saturating_add(1))
            .unwrap_or(u32::MAX)
            .min(config.max_connections.max(1));

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            // writers queue here when they outnumber connections
            .acquire_timeout(config.connect_timeout().max(config.insert_timeout()))
            .test_before_acquire(true)
            .connect_lazy_with(connect_options);

        tracing::info!(
            max_connections,
            url = %config.masked_url(),
            "PostgreSQL store configured"
        );

        Ok(Self {
            pool,
            connect_timeout: config.connect_timeout(),
            max_connections,
        })
    }

    /// Size limit of the connection pool
    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    /// The underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Count documents in a collection
    pub async fn count(&self, collection: &str) -> StoreResult<i64> {
        let table = quoted_table(collection)?;
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Fetch every stored document of a collection in insertion order
    pub async fn documents(&self, collection: &str) -> StoreResult<Vec<serde_json::Value>> {
        let table = quoted_table(collection)?;
        let rows = sqlx::query_scalar::<_, Json<serde_json::Value>>(&format!(
            "SELECT document FROM {} ORDER BY id",
            table
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(doc)| doc).collect())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        let start = std::time::Instant::now();

        tokio::time::timeout(
            self.connect_timeout,
            sqlx::query("SELECT 1").fetch_one(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout("ping".to_string()))?
        .map_err(|e| StoreError::Connection(format!("Ping failed: {}", e)))?;

        let elapsed = start.elapsed();
        if elapsed > Duration::from_secs(1) {
            tracing::warn!(elapsed_ms = elapsed.as_millis() as u64, "Store ping slow");
        }

        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> StoreResult<()> {
        let table = quoted_table(collection)?;

        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    document JSONB NOT NULL,
                    event_type TEXT NOT NULL,
                    distinct_id BIGINT,
                    session_id TEXT NOT NULL,
                    occurred_at TIMESTAMPTZ NOT NULL,
                    inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#
            ),
            format!(
                r#"CREATE INDEX IF NOT EXISTS "{collection}_event_type_idx" ON {table} (event_type)"#
            ),
            format!(
                r#"CREATE INDEX IF NOT EXISTS "{collection}_distinct_id_idx" ON {table} (distinct_id)"#
            ),
            format!(
                r#"CREATE INDEX IF NOT EXISTS "{collection}_session_id_idx" ON {table} (session_id)"#
            ),
            format!(
                r#"CREATE INDEX IF NOT EXISTS "{collection}_occurred_at_idx" ON {table} (occurred_at)"#
            ),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::QueryExecution(format!("{}: {}", collection, e)))?;
        }

        tracing::info!(collection, "Collection ready");
        Ok(())
    }

    /// Checks a connection out once to prove the pool can serve the session
    async fn open_session(&self) -> StoreResult<Box<dyn StoreSession>> {
        let conn = acquire(&self.pool).await?;
        drop(conn);

        Ok(Box::new(PgSession {
            pool: self.pool.clone(),
        }))
    }
}

async fn acquire(pool: &PgPool) -> StoreResult<PoolConnection<Postgres>> {
    pool.acquire()
        .await
        .map_err(|e| StoreError::Connection(format!("Failed to acquire connection: {}", e)))
}

/// One writer's access to the pool
///
/// Owned by a single worker. A connection is held only for the duration of
/// one bulk insert and is discarded rather than returned when the insert
/// fails with a connection-class error.
pub struct PgSession {
    pool: PgPool,
}

#[async_trait]
impl StoreSession for PgSession {
    async fn bulk_insert(&mut self, collection: &str, batch: &EventBatch) -> StoreResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let table = quoted_table(collection)?;
        let mut conn = acquire(&self.pool).await?;

        match insert_documents(&mut conn, &table, batch).await {
            Ok(inserted) => Ok(inserted),
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(error = %e, "Discarding broken store connection");
                    drop(conn.detach());
                }
                Err(e)
            },
        }
    }
}

async fn insert_documents(
    conn: &mut PoolConnection<Postgres>,
    table: &str,
    batch: &EventBatch,
) -> StoreResult<u64> {
    let mut rows = Vec::with_capacity(batch.len());
    for event in batch {
        rows.push((
            event.to_document()?,
            event.event_type.clone(),
            event.distinct_id_i64(),
            event.session_id.clone(),
            event.timestamp,
        ));
    }

    let mut tx = conn.begin().await?;
    let mut inserted = 0;

    while !rows.is_empty() {
        let chunk: Vec<_> = rows
            .drain(..rows.len().min(MAX_ROWS_PER_STATEMENT))
            .collect();

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (document, event_type, distinct_id, session_id, occurred_at) ",
            table
        ));
        builder.push_values(
            chunk,
            |mut row, (document, event_type, distinct_id, session_id, occurred_at)| {
                row.push_bind(Json(document))
                    .push_bind(event_type)
                    .push_bind(distinct_id)
                    .push_bind(session_id)
                    .push_bind(occurred_at);
            },
        );

        let result = builder.build().execute(&mut *tx).await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Quote a collection name for use as a table identifier
fn quoted_table(collection: &str) -> StoreResult<String> {
    if !is_valid_collection_name(collection) {
        return Err(StoreError::InvalidCollection(collection.to_string()));
    }
    Ok(format!("\"{}\"", collection))
}
