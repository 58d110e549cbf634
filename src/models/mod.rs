//! Data models for eventsink
//!
//! This module contains the domain models used throughout the service,
//! including event structures, field validation and normalization.

pub mod error;
pub mod event;
pub mod normalizer;
pub mod validation;

// Re-export commonly used types
pub use error::{ValidationError, ValidationErrorKind, ValidationErrors};
pub use event::{EventBatch, NormalizedEvent, RawEvent, RequiredFields};
pub use normalizer::{EventNormalizer, NormalizationReport, RejectedEvent, TimestampFallback};
pub use validation::{validate_number, validate_required_string, validate_timestamp_field};
