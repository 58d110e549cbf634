//! Event validation errors
//!
//! Validation never fails a submission, so these errors are only ever
//! logged and counted. They are kept apart from the application [`Error`]
//! for that reason.
//!
//! [`Error`]: crate::error::Error

use std::fmt;
use thiserror::Error;

/// Why a single field was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    #[error("missing")]
    RequiredField,

    #[error("expected {expected}")]
    WrongType { expected: &'static str },

    /// Empty or whitespace-only string
    #[error("empty")]
    Empty,

    #[error("not an RFC3339 timestamp")]
    InvalidTimestamp,

    #[error("not a JSON object")]
    NotAnObject,
}

/// A rejected field
#[derive(Error, Debug, Clone)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub field: String,
    /// What was found instead, when that helps
    pub context: Option<String>,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, field: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            context: None,
        }
    }

    pub fn with_context(
        kind: ValidationErrorKind,
        field: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            context: Some(context.into()),
            ..Self::new(kind, field)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` {}", self.field, self.kind)?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Every rejected field of one event
#[derive(Debug, Default, Clone)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.errors.iter()
    }

    /// Check whether a given field failed
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

/// Renders on one line, e.g. "`type` missing; `distinct_id` expected number"
impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
