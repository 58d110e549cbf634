//! Application errors
//!
//! One [`Error`] covers startup, the pipeline and the HTTP surface. Handlers
//! return it directly; the status and JSON body come from [`IntoResponse`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for eventsink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for eventsink
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup failures (store unreachable, pool could not start)
    #[error("Startup error: {0}")]
    Startup(String),

    /// Schema document could not be loaded or compiled
    #[error("Schema error: {0}")]
    Schema(String),

    /// Document store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Malformed client input
    #[error("Validation error: {0}")]
    Validation(String),

    /// The ingestion queue stayed full past the enqueue timeout
    #[error("Ingestion queue is full: {0}")]
    Overloaded(String),

    /// JSON that could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Intake closed by the lifecycle coordinator
    #[error("Service is shutting down")]
    ShuttingDown,
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn startup<S: Into<String>>(msg: S) -> Self {
        Error::Startup(msg.into())
    }

    pub fn schema<S: Into<String>>(msg: S) -> Self {
        Error::Schema(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        Error::Store(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Error::Validation(msg.into())
    }

    pub fn overloaded<S: Into<String>>(msg: S) -> Self {
        Error::Overloaded(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// HTTP status reported to the client
    ///
    /// Overload keeps the generic 500 clients of the tracking endpoint already
    /// expect; only shutdown is reported as 503.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_)
            | Error::Startup(_)
            | Error::Schema(_)
            | Error::Store(_)
            | Error::Overloaded(_)
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error must abort process startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Startup(_) | Error::Schema(_))
    }
}

/// Body shape: `{"error": {"message", "type", "status"}}`
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type(&self),
                "status": status.as_u16(),
            }
        }));

        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
                tracing::error!(error = ?self, status = status.as_u16(), "Request failed");
            },
            StatusCode::BAD_REQUEST => {
                tracing::warn!(error = ?self, "Rejected request");
            },
            _ => {
                tracing::info!(error = ?self, status = status.as_u16(), "Request not served");
            },
        }

        (status, body).into_response()
    }
}

/// Machine-readable `type` field of the error body
fn error_type(error: &Error) -> &'static str {
    match error {
        Error::Config(_) => "configuration_error",
        Error::Startup(_) => "startup_error",
        Error::Schema(_) => "schema_error",
        Error::Store(_) => "store_error",
        Error::Validation(_) => "validation_error",
        Error::Overloaded(_) => "overloaded",
        Error::Serialization(_) => "serialization_error",
        Error::Io(_) => "io_error",
        Error::Internal(_) => "internal_error",
        Error::ShuttingDown => "shutting_down",
    }
}

impl From<envconfig::Error> for Error {
    fn from(err: envconfig::Error) -> Self {
        Error::Config(err.to_string())
    }
}
