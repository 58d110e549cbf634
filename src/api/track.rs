//! Event tracking endpoint

use axum::{body::Bytes, extract::State, http::StatusCode};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::pipeline::IngestService;

/// Accept a `{"events": [...]}` submission
///
/// Replies `204 No Content` once the batch is queued. The body is decoded
/// here rather than through the `Json` extractor so every malformed payload
/// gets the service's own error envelope.
///
/// # Example
/// ```text
/// POST /v1/track
/// {"events": [{"type": "click", "distinct_id": 100, "session_id": "abc"}]}
/// ```
pub async fn track_events(
    State(ingest): State<IngestService>,
    body: Bytes,
) -> Result<StatusCode> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| Error::validation(format!("Request body is not valid JSON: {}", e)))?;

    ingest.submit(payload).await?;

    Ok(StatusCode::NO_CONTENT)
}
