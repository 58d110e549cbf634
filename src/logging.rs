//! Logging module for eventsink
//!
//! Structured logging with the tracing crate: JSON lines in production,
//! pretty output everywhere else. `RUST_LOG` overrides the configured level.

use std::time::{Duration, Instant};
use tracing::Span;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// Output format of the log stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn for_environment(environment: &str) -> Self {
        if environment == "production" {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Default filter directives for a configured level
fn default_directives(log_level: &str) -> String {
    format!("eventsink={},tower_http={}", log_level, log_level)
}

/// Install the global subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_tracing(config: &ServerConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    let format = LogFormat::for_environment(&config.environment);
    let formatting_layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .boxed(),
    };

    Registry::default()
        .with(formatting_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| Error::internal(format!("Failed to initialize tracing: {}", e)))?;

    tracing::info!(
        environment = %config.environment,
        log_level = %config.log_level,
        format = ?format,
        "Logging initialized"
    );

    Ok(())
}

/// Create a span for a writer worker's store operation
#[macro_export]
macro_rules! store_span {
    ($operation:expr, $worker_id:expr) => {
        tracing::info_span!(
            "store",
            operation = $operation,
            worker_id = $worker_id,
            batch_id = tracing::field::Empty,
            documents = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        )
    };
}

/// Log an error with context
#[macro_export]
macro_rules! log_error {
    ($error:expr, $msg:expr) => {
        tracing::error!(
            error = %$error,
            error_type = ?$error,
            $msg
        )
    };
    ($error:expr, $msg:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::error!(
            error = %$error,
            error_type = ?$error,
            $($key = tracing::field::display(&$value),)*
            $msg
        )
    };
}

/// Measures one operation and records it on a span's `duration_ms` field
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record the elapsed time on `span` and return it
    pub fn record(&self, span: &Span) -> Duration {
        let elapsed = self.elapsed();
        span.record("duration_ms", elapsed.as_millis() as u64);
        elapsed
    }
}
