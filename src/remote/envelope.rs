//! Response envelope handling.
//!
//! Success bodies carry the payload under `data`; failures carry an optional
//! `error` (string or `{ "message": .. }`) or `message` field.

use crate::core::{Result, SyncError};
use serde_json::Value as JsonValue;

pub fn parse_success(body: &[u8]) -> Result<JsonValue> {
    let document: JsonValue = serde_json::from_slice(body)
        .map_err(|e| SyncError::Malformed(format!("response is not JSON: {}", e)))?;
    match document {
        JsonValue::Object(mut map) => map
            .remove("data")
            .filter(|data| !data.is_null())
            .ok_or_else(|| SyncError::Malformed("response has no `data` field".to_string())),
        _ => Err(SyncError::Malformed(
            "response body is not an object".to_string(),
        )),
    }
}

pub fn parse_failure(status: u16, body: &[u8]) -> SyncError {
    let message = serde_json::from_slice::<JsonValue>(body)
        .ok()
        .and_then(|document| error_message(&document))
        .unwrap_or_else(|| format!("request failed with status {}", status));
    SyncError::Rejected { status, message }
}

fn error_message(document: &JsonValue) -> Option<String> {
    let from_error = document.get("error").and_then(|error| match error {
        JsonValue::String(message) => Some(message.clone()),
        JsonValue::Object(_) => error
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        _ => None,
    });
    from_error.or_else(|| {
        document
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    })
}

/// Expects the payload of a list response to be an array.
pub fn into_list(data: JsonValue) -> Result<Vec<JsonValue>> {
    match data {
        JsonValue::Array(items) => Ok(items),
        other => Err(SyncError::Malformed(format!(
            "expected an array of records, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_unwraps_data() {
        let body = br#"{"data":{"id":"lead-1"}}"#;
        assert_eq!(parse_success(body).unwrap(), json!({ "id": "lead-1" }));
    }

    #[test]
    fn test_success_without_data_is_malformed() {
        assert!(matches!(
            parse_success(br#"{"record":{}}"#),
            Err(SyncError::Malformed(_))
        ));
        assert!(matches!(parse_success(b"<html>"), Err(SyncError::Malformed(_))));
    }

    #[test]
    fn test_failure_message_sources() {
        let err = parse_failure(400, br#"{"error":"email already taken"}"#);
        assert_eq!(err.message(), "email already taken");

        let err = parse_failure(409, br#"{"error":{"message":"conflict"}}"#);
        assert_eq!(err.message(), "conflict");

        let err = parse_failure(500, br#"{"message":"boom"}"#);
        assert_eq!(err.message(), "boom");

        let err = parse_failure(502, b"");
        assert_eq!(
            err,
            SyncError::Rejected {
                status: 502,
                message: "request failed with status 502".into()
            }
        );
    }

    #[test]
    fn test_list_requires_array() {
        assert_eq!(into_list(json!([1, 2])).unwrap().len(), 2);
        assert!(into_list(json!({ "id": "x" })).is_err());
    }
}
