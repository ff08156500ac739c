//! # HTTP Utilities
//!
//! Helpers shared by the generic HTTP fallback and the built-in HTTP connectors:
//! response body decoding, bearer token selection, and normalization of loosely
//! typed request inputs.

use conduit_types::ServiceCredentials;
use serde_json::{Map, Value};

/// Credential fields consulted, in order, when building a bearer token.
pub const BEARER_TOKEN_FIELDS: [&str; 3] = ["api_key", "access_token", "token"];

/// Parse a response body into JSON.
///
/// An empty body yields an empty object. Text that is not valid JSON is wrapped
/// as `{"raw": <text>}` so callers always receive a structured value.
///
/// # Example
/// ```rust
/// use conduit_util::http::parse_response_body;
/// use serde_json::json;
///
/// assert_eq!(parse_response_body(r#"{"ok": true}"#), json!({"ok": true}));
/// assert_eq!(parse_response_body("plain text"), json!({"raw": "plain text"}));
/// assert_eq!(parse_response_body(""), json!({}));
/// ```
pub fn parse_response_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str::<Value>(text).unwrap_or_else(|_| {
        let mut wrapped = Map::new();
        wrapped.insert("raw".into(), Value::String(text.to_string()));
        Value::Object(wrapped)
    })
}

/// Return the first bearer-capable credential among `api_key`, `access_token`, and `token`.
pub fn bearer_token(credentials: &ServiceCredentials) -> Option<&str> {
    BEARER_TOKEN_FIELDS
        .iter()
        .find_map(|field| credentials.get(*field))
        .map(String::as_str)
}

/// Decode a value that may carry JSON encoded as a string.
///
/// Workflow inputs often arrive as template results, so `headers` or `params`
/// can be `"{\"a\": 1}"` instead of an object. Strings that do not parse are
/// returned unchanged.
pub fn decode_embedded_json(value: &Value) -> Value {
    match value {
        Value::String(text) => serde_json::from_str::<Value>(text).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

/// Flatten a JSON object into string pairs suitable for headers or query parameters.
///
/// Non-object values produce no pairs. Null entries are dropped; non-string
/// scalars are rendered with their JSON text.
pub fn string_pairs(value: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = decode_embedded_json(value) else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(text) => Some((key, text)),
            other => Some((key, other.to_string())),
        })
        .collect()
}

/// Whether an HTTP status code counts as a failed call.
pub fn is_failure_status(status_code: u16) -> bool {
    status_code >= 400
}
