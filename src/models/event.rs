//! Event data models for eventsink
//!
//! This module defines the event structures that flow through the pipeline:
//! loosely-typed raw events decoded from client input, normalized events
//! ready for persistence, and the batch that carries one client submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::convert::TryFrom;
use uuid::Uuid;

use super::error::{ValidationError, ValidationErrorKind, ValidationErrors};
use super::validation::{json_type_name, validate_number, validate_required_string};

/// Field names with a fixed meaning in every event
pub mod fields {
    pub const TYPE: &str = "type";
    pub const DISTINCT_ID: &str = "distinct_id";
    pub const SESSION_ID: &str = "session_id";
    pub const TIMESTAMP: &str = "timestamp";
    pub const DATA: &str = "data";
}

/// Raw event as decoded from a client submission
///
/// No invariants hold until the event has been normalized; any field may be
/// missing or carry the wrong JSON type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent {
    fields: Map<String, Value>,
}

impl RawEvent {
    /// Wrap an already decoded JSON object
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Get a field by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Borrow all fields
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Take ownership of all fields
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Check the required identity fields, collecting every failure
    pub fn validate_fields(&self) -> Result<RequiredFields, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let event_type = validate_required_string(&self.fields, fields::TYPE)
            .map_err(|e| errors.add(e))
            .ok();
        let distinct_id = validate_number(&self.fields, fields::DISTINCT_ID)
            .map_err(|e| errors.add(e))
            .ok();
        let session_id = validate_required_string(&self.fields, fields::SESSION_ID)
            .map_err(|e| errors.add(e))
            .ok();

        match (event_type, distinct_id, session_id) {
            (Some(event_type), Some(distinct_id), Some(session_id)) => Ok(RequiredFields {
                event_type,
                distinct_id,
                session_id,
            }),
            _ => Err(errors),
        }
    }
}

impl TryFrom<Value> for RawEvent {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(ValidationError::with_context(
                ValidationErrorKind::NotAnObject,
                "event",
                format!("got {}", json_type_name(&other)),
            )),
        }
    }
}

/// Required fields extracted from a raw event that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredFields {
    pub event_type: String,
    pub distinct_id: Number,
    pub session_id: String,
}

/// Normalized event ready for persistence
///
/// Serializes to the stored document: the identity fields, the resolved
/// timestamp, the opaque `data` payload and every other client field as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Event type
    #[serde(rename = "type")]
    pub event_type: String,

    /// Numeric identifier of the user
    pub distinct_id: Number,

    /// Client session the event belongs to
    pub session_id: String,

    /// When the event happened, or when it was received
    pub timestamp: DateTime<Utc>,

    /// Opaque client payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Any other client fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NormalizedEvent {
    /// Assemble a normalized event from validated parts
    ///
    /// `rest` holds the raw fields; identity and timestamp keys are removed
    /// from it so the document never carries them twice.
    pub fn from_parts(
        required: RequiredFields,
        timestamp: DateTime<Utc>,
        mut rest: Map<String, Value>,
    ) -> Self {
        rest.remove(fields::TYPE);
        rest.remove(fields::DISTINCT_ID);
        rest.remove(fields::SESSION_ID);
        rest.remove(fields::TIMESTAMP);
        let data = rest.remove(fields::DATA);

        Self {
            event_type: required.event_type,
            distinct_id: required.distinct_id,
            session_id: required.session_id,
            timestamp,
            data,
            extra: rest,
        }
    }

    /// Render the stored document
    pub fn to_document(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Distinct id as a signed integer, when it is one
    pub fn distinct_id_i64(&self) -> Option<i64> {
        self.distinct_id.as_i64()
    }
}

/// One client submission after normalization
///
/// Owned by the queue while waiting and by exactly one writer afterwards.
#[derive(Debug)]
pub struct EventBatch {
    /// Identifier used to correlate logs across the pipeline
    pub id: Uuid,

    /// When the submission was received
    pub received_at: DateTime<Utc>,

    /// Events in submission order
    pub events: Vec<NormalizedEvent>,
}

impl EventBatch {
    /// Create a new batch with a fresh identifier
    pub fn new(events: Vec<NormalizedEvent>, received_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            received_at,
            events,
        }
    }

    /// Number of events in the batch
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the batch holds no events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate over the events
    pub fn iter(&self) -> std::slice::Iter<'_, NormalizedEvent> {
        self.events.iter()
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a NormalizedEvent;
    type IntoIter = std::slice::Iter<'a, NormalizedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
