//! Event normalization
//!
//! Turns a decoded client submission into an [`EventBatch`]. A bad event
//! never fails the submission: events with broken identity fields are
//! dropped with a diagnostic, and events with a malformed timestamp are kept
//! with the receipt time instead.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use super::error::{ValidationError, ValidationErrors};
use super::event::{fields, EventBatch, NormalizedEvent, RawEvent};
use super::validation::parse_optional_timestamp;

/// An event excluded from the batch
#[derive(Debug, Clone)]
pub struct RejectedEvent {
    /// Position in the submitted `events` array
    pub index: usize,
    /// Why it was excluded
    pub errors: ValidationErrors,
}

/// An event whose timestamp was replaced by the receipt time
#[derive(Debug, Clone)]
pub struct TimestampFallback {
    /// Position in the submitted `events` array
    pub index: usize,
    /// Why the supplied timestamp was not used
    pub error: ValidationError,
}

/// Outcome of normalizing one submission
#[derive(Debug)]
pub struct NormalizationReport {
    /// Events that passed validation, in submission order
    pub batch: EventBatch,
    /// Events dropped from the batch
    pub rejected: Vec<RejectedEvent>,
    /// Events kept with a fallback timestamp
    pub timestamp_fallbacks: Vec<TimestampFallback>,
}

impl NormalizationReport {
    /// Number of events submitted
    pub fn submitted(&self) -> usize {
        self.batch.len() + self.rejected.len()
    }

    /// Check if every submitted event made it into the batch
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.timestamp_fallbacks.is_empty()
    }
}

/// Validates and normalizes raw event batches
#[derive(Debug, Clone, Copy, Default)]
pub struct EventNormalizer;

impl EventNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a batch using the current time as the receipt time
    pub fn normalize(&self, raw_batch: Vec<RawEvent>) -> NormalizationReport {
        self.normalize_at(raw_batch, Utc::now())
    }

    /// Normalize a batch with an explicit receipt time
    pub fn normalize_at(
        &self,
        raw_batch: Vec<RawEvent>,
        received_at: DateTime<Utc>,
    ) -> NormalizationReport {
        self.normalize_indexed(raw_batch.into_iter().enumerate(), received_at)
    }

    /// Normalize the decoded `events` array of a submission
    ///
    /// Elements that are not JSON objects are rejected at their position in
    /// the array, like any other invalid event.
    pub fn normalize_values(
        &self,
        values: Vec<Value>,
        received_at: DateTime<Utc>,
    ) -> NormalizationReport {
        let mut not_objects = Vec::new();
        let mut raw_batch = Vec::with_capacity(values.len());

        for (index, value) in values.into_iter().enumerate() {
            match RawEvent::try_from(value) {
                Ok(raw) => raw_batch.push((index, raw)),
                Err(error) => {
                    warn!(index, error = %error, "Dropping invalid event");
                    let mut errors = ValidationErrors::new();
                    errors.add(error);
                    not_objects.push(RejectedEvent { index, errors });
                },
            }
        }

        let mut report = self.normalize_indexed(raw_batch, received_at);
        if !not_objects.is_empty() {
            report.rejected.extend(not_objects);
            report.rejected.sort_by_key(|rejected| rejected.index);
        }
        report
    }

    /// Normalize events tagged with their position in the submission
    pub fn normalize_indexed<I>(
        &self,
        raw_batch: I,
        received_at: DateTime<Utc>,
    ) -> NormalizationReport
    where
        I: IntoIterator<Item = (usize, RawEvent)>,
    {
        let mut events = Vec::new();
        let mut rejected = Vec::new();
        let mut timestamp_fallbacks = Vec::new();

        for (index, raw) in raw_batch {
            let required = match raw.validate_fields() {
                Ok(required) => required,
                Err(errors) => {
                    warn!(index, errors = %errors, "Dropping invalid event");
                    rejected.push(RejectedEvent { index, errors });
                    continue;
                },
            };

            let timestamp =
                match parse_optional_timestamp(raw.get(fields::TIMESTAMP), fields::TIMESTAMP) {
                    Ok(Some(timestamp)) => timestamp,
                    Ok(None) => received_at,
                    Err(error) => {
                        warn!(index, error = %error, "Using receipt time for event");
                        timestamp_fallbacks.push(TimestampFallback { index, error });
                        received_at
                    },
                };

            events.push(NormalizedEvent::from_parts(
                required,
                timestamp,
                raw.into_fields(),
            ));
        }

        NormalizationReport {
            batch: EventBatch::new(events, received_at),
            rejected,
            timestamp_fallbacks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn raw_batch(values: Vec<Value>) -> Vec<RawEvent> {
        values.into_iter().map(|v| RawEvent::try_from(v).unwrap()).collect()
    }

    fn valid(session: &str) -> Value {
        json!({"type": "click", "distinct_id": 7, "session_id": session})
    }

    #[test]
    fn test_valid_events_get_receipt_time() {
        let received_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let report =
            EventNormalizer::new().normalize_at(raw_batch(vec![valid("a"), valid("b")]), received_at);

        assert!(report.is_clean());
        assert_eq!(report.batch.len(), 2);
        assert_eq!(report.batch.received_at, received_at);
        for event in &report.batch {
            assert_eq!(event.timestamp, received_at);
        }
    }

    #[test]
    fn test_supplied_timestamp_is_kept_exactly() {
        let mut event = valid("a");
        event["timestamp"] = json!("2023-01-01T00:00:00.000Z");

        let report = EventNormalizer::new().normalize(raw_batch(vec![event]));

        assert_eq!(report.batch.len(), 1);
        assert_eq!(
            report.batch.events[0].timestamp,
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_unparsable_timestamp_falls_back() {
        let mut bad_string = valid("a");
        bad_string["timestamp"] = json!("yesterday");
        let mut bad_type = valid("b");
        bad_type["timestamp"] = json!(12345);

        let before = Utc::now();
        let report = EventNormalizer::new().normalize(raw_batch(vec![bad_string, bad_type]));
        let after = Utc::now();

        assert_eq!(report.batch.len(), 2);
        assert!(report.rejected.is_empty());
        assert_eq!(report.timestamp_fallbacks.len(), 2);
        assert_eq!(report.timestamp_fallbacks[0].index, 0);
        for event in &report.batch {
            assert!(event.timestamp >= before && event.timestamp <= after);
        }
    }

    #[test]
    fn test_invalid_events_dropped_others_kept() {
        let batch = raw_batch(vec![
            json!({"distinct_id": 1, "session_id": "s"}),
            valid("keep-1"),
            json!({"type": "click", "session_id": "s"}),
            json!({"type": "click", "distinct_id": 1}),
            json!({"type": "click", "distinct_id": "1", "session_id": "s"}),
            valid("keep-2"),
        ]);

        let report = EventNormalizer::new().normalize(batch);

        assert_eq!(report.submitted(), 6);
        assert_eq!(report.batch.len(), 2);
        assert_eq!(report.batch.events[0].session_id, "keep-1");
        assert_eq!(report.batch.events[1].session_id, "keep-2");

        let indexes: Vec<usize> = report.rejected.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 2, 3, 4]);
        assert!(report.rejected[0].errors.has_field("type"));
        assert!(report.rejected[1].errors.has_field("distinct_id"));
        assert!(report.rejected[2].errors.has_field("session_id"));
        assert!(report.rejected[3].errors.has_field("distinct_id"));
    }

    #[test]
    fn test_positions_count_non_object_elements() {
        let mut late_timestamp = valid("c");
        late_timestamp["timestamp"] = json!("not a time");

        let report = EventNormalizer::new().normalize_values(
            vec![
                json!(42),
                json!({"type": "click"}),
                valid("a"),
                json!("string"),
                late_timestamp,
            ],
            Utc::now(),
        );

        assert_eq!(report.batch.len(), 2);
        assert_eq!(report.submitted(), 5);

        let indexes: Vec<usize> = report.rejected.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 3]);
        assert!(report.rejected[0].errors.has_field("event"));
        assert!(report.rejected[1].errors.has_field("distinct_id"));

        assert_eq!(report.timestamp_fallbacks.len(), 1);
        assert_eq!(report.timestamp_fallbacks[0].index, 4);
    }

    #[test]
    fn test_empty_batch() {
        let report = EventNormalizer::new().normalize(Vec::new());
        assert!(report.batch.is_empty());
        assert!(report.is_clean());
    }
}
