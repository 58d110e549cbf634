//! Test utilities for eventsink
//!
//! Builders for configuration, payloads and batches, plus small async
//! helpers shared by unit and integration tests.

use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

use crate::api::{AppState, HealthState};
use crate::config::{Config, IngestionConfig, RuntimeConfig, ServerConfig, StoreConfig};
use crate::models::{EventBatch, EventNormalizer, RawEvent};
use crate::pipeline::{IngestService, IngestionQueue, LifecycleState, PipelineStats};
use crate::schema::SchemaValidator;

/// Configuration for tests: memory store, two workers, short timeouts
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            log_level: "debug".to_string(),
            environment: "test".to_string(),
            request_timeout_secs: 30,
            shutdown_grace_secs: 5,
            metrics_enabled: true,
        },
        store: StoreConfig {
            backend: "memory".to_string(),
            url: "postgresql://localhost:5432/analytics_test".to_string(),
            collection: "events".to_string(),
            connect_timeout_secs: 2,
            max_connections: 8,
            insert_timeout_secs: 5,
            insert_max_retries: 0,
            retry_base_ms: 10,
            retry_max_ms: 100,
        },
        ingestion: IngestionConfig {
            queue_capacity: 10,
            pool_size_factor: 1,
            worker_count: 2,
            enqueue_timeout_ms: 200,
        },
        runtime: RuntimeConfig {
            memory_stats_interval_secs: 0,
            health_check_interval_secs: 30,
            schema_path: "events_schema.json".to_string(),
        },
    }
}

/// Location of the events schema shipped with the service
pub fn shipped_schema_path() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/events_schema.json"))
}

/// The events schema shipped with the service
pub fn events_schema() -> Value {
    serde_json::from_str(include_str!("../events_schema.json"))
        .expect("shipped events schema is valid JSON")
}

/// A schema that accepts any document
pub fn permissive_schema() -> SchemaValidator {
    SchemaValidator::compile(json!({})).expect("empty schema compiles")
}

/// A valid event without a timestamp
pub fn raw_event(session_id: &str) -> Value {
    json!({
        "type": "click",
        "distinct_id": 100,
        "session_id": session_id,
        "tags": ["test"],
        "data": {"button": "play"}
    })
}

/// Wrap events in a submission body
pub fn track_payload(events: Vec<Value>) -> Value {
    json!({ "events": events })
}

/// A normalized batch of `count` valid events
pub fn event_batch(count: usize) -> EventBatch {
    let raw = (0..count)
        .map(|i| {
            RawEvent::try_from(raw_event(&format!("session-{}", i))).expect("event is an object")
        })
        .collect();
    EventNormalizer::new().normalize_at(raw, Utc::now()).batch
}

/// Handler state over a fresh queue, with the lifecycle already running
pub fn app_state(config: &Config) -> (AppState, IngestionQueue) {
    let queue = IngestionQueue::new(config.ingestion.queue_capacity);
    let ingest = IngestService::new(
        queue.clone(),
        Arc::new(permissive_schema()),
        Arc::new(PipelineStats::new()),
        config.ingestion.enqueue_timeout(),
    );
    let (_, lifecycle) = watch::channel(LifecycleState::Running);

    let state = AppState {
        ingest,
        health: Arc::new(HealthState::new(lifecycle)),
        workers: config.ingestion.worker_count,
    };
    (state, queue)
}

/// Poll `condition` until it holds, panicking after `timeout`
pub async fn wait_until<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for a watch channel to reach `state`
pub async fn wait_for_state(
    receiver: &mut watch::Receiver<LifecycleState>,
    state: LifecycleState,
    timeout: Duration,
) {
    let reached = tokio::time::timeout(timeout, receiver.wait_for(|current| *current == state));
    match reached.await {
        Ok(Ok(_)) => {},
        Ok(Err(_)) => panic!("lifecycle channel closed before reaching {}", state),
        Err(_) => panic!("lifecycle did not reach {} within {:?}", state, timeout),
    }
}

/// Minimal HTTP/1.1 response
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub head: String,
    pub body: String,
}

impl RawResponse {
    /// Value of a response header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

/// Send one request over a fresh connection and read the whole response
pub async fn http_request(
    address: SocketAddr,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> std::io::Result<RawResponse> {
    let mut stream = tokio::net::TcpStream::connect(address).await?;

    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {address}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let raw = String::from_utf8_lossy(&raw).into_owned();

    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw.as_str(), ""));
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no status line"))?;

    Ok(RawResponse {
        status,
        head: head.to_string(),
        body: body.to_string(),
    })
}

/// Run `future` with a deadline, panicking if it does not finish
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or_else(|_| panic!("did not finish within {:?}", timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_valid() {
        test_config().validate().unwrap();
    }

    #[test]
    fn test_event_batch_builder() {
        let batch = event_batch(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.events[2].session_id, "session-2");
    }

    #[test]
    fn test_raw_response_header_lookup() {
        let response = RawResponse {
            status: 204,
            head: "HTTP/1.1 204 No Content\r\nX-Runtime: 0.000120\r\n".to_string(),
            body: String::new(),
        };
        assert_eq!(response.header("x-runtime"), Some("0.000120"));
        assert_eq!(response.header("x-request-id"), None);
    }
}
