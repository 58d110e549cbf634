//! Submission intake
//!
//! Validates the shape of one client submission, normalizes its events and
//! offers the resulting batch to the queue. This is the whole request-side
//! path; persistence happens later on a writer.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::queue::{EnqueueOutcome, IngestionQueue, RejectReason};
use super::stats::PipelineStats;
use crate::error::{Error, Result};
use crate::models::validation::json_type_name;
use crate::models::EventNormalizer;
use crate::schema::SchemaValidator;

/// Field of the submission holding the event list
pub const EVENTS_FIELD: &str = "events";

/// What happened to an accepted submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    /// Queued batch, `None` when no event survived validation
    pub batch_id: Option<Uuid>,
    /// Events in the submission
    pub submitted: usize,
    /// Events handed to the queue
    pub accepted: usize,
    /// Events excluded by validation
    pub dropped: usize,
    /// Events stored with the receipt time
    pub timestamp_fallbacks: usize,
    /// Schema violations reported for the payload
    pub schema_diagnostics: usize,
}

/// Entry point for client submissions
#[derive(Clone)]
pub struct IngestService {
    queue: IngestionQueue,
    schema: Arc<SchemaValidator>,
    normalizer: EventNormalizer,
    stats: Arc<PipelineStats>,
    enqueue_timeout: Duration,
}

impl IngestService {
    pub fn new(
        queue: IngestionQueue,
        schema: Arc<SchemaValidator>,
        stats: Arc<PipelineStats>,
        enqueue_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            schema,
            normalizer: EventNormalizer::new(),
            stats,
            enqueue_timeout,
        }
    }

    pub fn queue(&self) -> &IngestionQueue {
        &self.queue
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Accept one `{"events": [...]}` submission
    ///
    /// Fails with `Validation` for a malformed payload, `Overloaded` when the
    /// queue stayed full for the whole enqueue timeout and `ShuttingDown`
    /// once the queue is closed. Individual bad events never fail the call.
    pub async fn submit(&self, payload: Value) -> Result<SubmitReceipt> {
        let mut body = match payload {
            Value::Object(body) => body,
            other => {
                return Err(Error::validation(format!(
                    "Request body must be a JSON object, got {}",
                    json_type_name(&other)
                )))
            },
        };

        // Schema violations are reported but never reject the submission
        let report = self.schema.validate(&Value::Object(body.clone()));
        if !report.is_valid() {
            warn!(
                violations = report.diagnostics.len(),
                diagnostics = ?report.diagnostics,
                "Submission does not match the events schema"
            );
        }

        let events = match body.remove(EVENTS_FIELD) {
            Some(Value::Array(events)) => events,
            Some(other) => {
                return Err(Error::validation(format!(
                    "Field `{}` must be an array, got {}",
                    EVENTS_FIELD,
                    json_type_name(&other)
                )))
            },
            None => {
                return Err(Error::validation(format!(
                    "Missing required field `{}`",
                    EVENTS_FIELD
                )))
            },
        };

        let submitted = events.len();
        let normalized = self.normalizer.normalize_values(events, Utc::now());
        let dropped = normalized.rejected.len();
        let timestamp_fallbacks = normalized.timestamp_fallbacks.len();
        self.stats.record_dropped(dropped as u64);
        self.stats.record_timestamp_fallbacks(timestamp_fallbacks as u64);

        let mut receipt = SubmitReceipt {
            batch_id: None,
            submitted,
            accepted: normalized.batch.len(),
            dropped,
            timestamp_fallbacks,
            schema_diagnostics: report.diagnostics.len(),
        };

        if normalized.batch.is_empty() {
            debug!(submitted, dropped, "No valid events in submission");
            return Ok(receipt);
        }

        let batch_id = normalized.batch.id;
        match self.queue.enqueue(normalized.batch, self.enqueue_timeout).await {
            EnqueueOutcome::Accepted => {
                self.stats.record_accepted();
                debug!(%batch_id, events = receipt.accepted, "Batch queued");
                receipt.batch_id = Some(batch_id);
                Ok(receipt)
            },
            EnqueueOutcome::Rejected(RejectReason::Overloaded) => {
                self.stats.record_rejected();
                warn!(
                    %batch_id,
                    events = receipt.accepted,
                    timeout_ms = self.enqueue_timeout.as_millis() as u64,
                    "Queue full, batch rejected"
                );
                Err(Error::overloaded(format!(
                    "no queue slot freed within {}ms",
                    self.enqueue_timeout.as_millis()
                )))
            },
            EnqueueOutcome::Rejected(RejectReason::Closed) => {
                self.stats.record_rejected();
                Err(Error::ShuttingDown)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{permissive_schema, raw_event, track_payload};
    use serde_json::json;

    fn service(capacity: usize) -> IngestService {
        IngestService::new(
            IngestionQueue::new(capacity),
            Arc::new(permissive_schema()),
            Arc::new(PipelineStats::new()),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn test_submit_valid_events() {
        let service = service(4);
        let receipt = service
            .submit(track_payload(vec![raw_event("a"), raw_event("b")]))
            .await
            .unwrap();

        assert!(receipt.batch_id.is_some());
        assert_eq!(receipt.submitted, 2);
        assert_eq!(receipt.accepted, 2);
        assert_eq!(service.queue().len(), 1);
        assert_eq!(service.stats().snapshot().batches_accepted, 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_payloads() {
        let service = service(4);

        for payload in [
            json!([1, 2, 3]),
            json!("events"),
            json!({}),
            json!({"events": {"type": "click"}}),
            json!({"events": null}),
        ] {
            let err = service.submit(payload.clone()).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{}", payload);
        }
        assert!(service.queue().is_empty());
    }

    #[tokio::test]
    async fn test_submit_drops_bad_events() {
        let service = service(4);
        let receipt = service
            .submit(json!({"events": [
                raw_event("keep"),
                {"type": "click", "session_id": "s"},
                42,
            ]}))
            .await
            .unwrap();

        assert_eq!(receipt.submitted, 3);
        assert_eq!(receipt.accepted, 1);
        assert_eq!(receipt.dropped, 2);
        assert_eq!(service.stats().snapshot().events_dropped, 2);

        let batch = service.queue().dequeue().await.unwrap();
        assert_eq!(batch.events[0].session_id, "keep");
    }

    #[tokio::test]
    async fn test_submit_with_no_valid_events_skips_queue() {
        let service = service(4);
        let receipt = service.submit(json!({"events": []})).await.unwrap();

        assert!(receipt.batch_id.is_none());
        assert!(service.queue().is_empty());
        assert_eq!(service.stats().snapshot().batches_accepted, 0);
    }

    #[tokio::test]
    async fn test_schema_violations_are_not_fatal() {
        let schema = SchemaValidator::compile(json!({
            "type": "object",
            "properties": {"events": {"type": "array", "maxItems": 1}}
        }))
        .unwrap();
        let service = IngestService::new(
            IngestionQueue::new(4),
            Arc::new(schema),
            Arc::new(PipelineStats::new()),
            Duration::from_millis(100),
        );

        let receipt = service
            .submit(track_payload(vec![raw_event("a"), raw_event("b")]))
            .await
            .unwrap();

        assert_eq!(receipt.schema_diagnostics, 1);
        assert_eq!(receipt.accepted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_overloaded() {
        let service = service(1);
        service.submit(track_payload(vec![raw_event("a")])).await.unwrap();

        let err = service
            .submit(track_payload(vec![raw_event("b")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Overloaded(_)));
        assert_eq!(service.stats().snapshot().batches_rejected, 1);
        assert_eq!(service.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_close() {
        let service = service(1);
        service.queue().close();

        let err = service
            .submit(track_payload(vec![raw_event("a")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));
    }
}
