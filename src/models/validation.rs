//! Field validation functions for eventsink models
//!
//! Raw events arrive as loosely-typed JSON objects, so every check here works
//! on a `serde_json` map and returns the typed value on success.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

use super::error::{ValidationError, ValidationErrorKind, ValidationResult};

/// Name of the JSON type of a value, for diagnostics
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate that a field is present, is a string and is not blank
pub fn validate_required_string(
    fields: &Map<String, Value>,
    field_name: &str,
) -> ValidationResult<String> {
    match fields.get(field_name) {
        None => Err(ValidationError::new(
            ValidationErrorKind::RequiredField,
            field_name,
        )),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ValidationError::new(ValidationErrorKind::Empty, field_name))
        },
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ValidationError::with_context(
            ValidationErrorKind::WrongType { expected: "string" },
            field_name,
            format!("got {}", json_type_name(other)),
        )),
    }
}

/// Validate that a field is present and is a JSON number
pub fn validate_number(fields: &Map<String, Value>, field_name: &str) -> ValidationResult<Number> {
    match fields.get(field_name) {
        None => Err(ValidationError::new(
            ValidationErrorKind::RequiredField,
            field_name,
        )),
        Some(Value::Number(n)) => Ok(n.clone()),
        Some(other) => Err(ValidationError::with_context(
            ValidationErrorKind::WrongType { expected: "number" },
            field_name,
            format!("got {}", json_type_name(other)),
        )),
    }
}

/// Validate RFC3339 timestamp returning parsed DateTime
///
/// Fractional seconds and any UTC offset are accepted; the result is in UTC.
pub fn validate_timestamp_field(
    timestamp: &str,
    field_name: &str,
) -> ValidationResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ValidationError::with_context(
                ValidationErrorKind::InvalidTimestamp,
                field_name,
                format!("Failed to parse RFC3339 timestamp '{}': {}", timestamp, e),
            )
        })
}

/// Parse an optional timestamp value
///
/// `Ok(None)` means the field is absent or null. Non-string values are
/// reported as invalid timestamps.
pub fn parse_optional_timestamp(
    value: Option<&Value>,
    field_name: &str,
) -> ValidationResult<Option<DateTime<Utc>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => validate_timestamp_field(s, field_name).map(Some),
        Some(other) => Err(ValidationError::with_context(
            ValidationErrorKind::InvalidTimestamp,
            field_name,
            format!("Expected an RFC3339 string, got {}", json_type_name(other)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_required_string() {
        let map = fields(json!({"type": "click", "empty": "", "blank": "   ", "num": 4}));

        assert_eq!(validate_required_string(&map, "type").unwrap(), "click");

        let missing = validate_required_string(&map, "session_id").unwrap_err();
        assert_eq!(missing.kind, ValidationErrorKind::RequiredField);

        let empty = validate_required_string(&map, "empty").unwrap_err();
        assert_eq!(empty.kind, ValidationErrorKind::Empty);
        let blank = validate_required_string(&map, "blank").unwrap_err();
        assert_eq!(blank.kind, ValidationErrorKind::Empty);

        let wrong = validate_required_string(&map, "num").unwrap_err();
        assert_eq!(wrong.kind, ValidationErrorKind::WrongType { expected: "string" });
    }

    #[test]
    fn test_validate_number() {
        let map = fields(json!({"int": 100, "float": 1.5, "text": "100", "nil": null}));

        assert_eq!(validate_number(&map, "int").unwrap(), Number::from(100));
        assert!(validate_number(&map, "float").is_ok());
        assert!(validate_number(&map, "text").is_err());
        assert!(validate_number(&map, "nil").is_err());
        assert_eq!(
            validate_number(&map, "absent").unwrap_err().kind,
            ValidationErrorKind::RequiredField
        );
    }

    #[test]
    fn test_validate_timestamp_field() {
        let valid_timestamps = vec![
            "2023-01-01T00:00:00Z",
            "2023-01-01T00:00:00+00:00",
            "2023-01-01T00:00:00.123Z",
            "2023-12-31T23:59:59.123456789-05:00",
        ];

        for ts in valid_timestamps {
            assert!(validate_timestamp_field(ts, "timestamp").is_ok(), "{}", ts);
        }

        let invalid_timestamps = vec!["2023-01-01", "2023-01-01 00:00:00", "not-a-timestamp", ""];

        for ts in invalid_timestamps {
            assert!(validate_timestamp_field(ts, "timestamp").is_err(), "{}", ts);
        }
    }

    #[test]
    fn test_timestamp_offset_normalized_to_utc() {
        let parsed = validate_timestamp_field("2023-01-01T02:00:00+02:00", "timestamp").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_optional_timestamp() {
        assert_eq!(parse_optional_timestamp(None, "timestamp").unwrap(), None);
        assert_eq!(parse_optional_timestamp(Some(&Value::Null), "timestamp").unwrap(), None);
        assert!(parse_optional_timestamp(Some(&json!("2023-01-01T00:00:00Z")), "timestamp")
            .unwrap()
            .is_some());
        assert!(parse_optional_timestamp(Some(&json!(1672531200)), "timestamp").is_err());
    }
}
