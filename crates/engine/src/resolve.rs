//! # Template Resolution
//!
//! Resolves `{{ path }}` references inside step inputs against the template
//! scope of a run.
//!
//! ## Scope
//!
//! The scope is a JSON object with three roots:
//!
//! - `trigger.data.<field>` - payload that started the run
//! - `steps.<step_id>.output.<field>` (or `.data.<field>`) - results of completed steps
//! - `variables.<name>` - user supplied run variables
//!
//! ## Typing
//!
//! A string that consists of exactly one template (`"{{ steps.a.output.count }}"`)
//! resolves to the referenced value with its native JSON type. Templates embedded
//! in surrounding text are stringified and the result is always a string.
//!
//! ## Missing paths
//!
//! Lookups never fail. A key that does not exist or an index that is out of
//! range resolves to the empty string, so one bad reference does not abort a
//! step. Use [`lookup_path`] when the caller needs to tell "missing" apart.
//!
//! ## Usage
//!
//! ```rust
//! use conduit_engine::resolve::resolve_value;
//! use serde_json::json;
//!
//! let scope = json!({
//!     "trigger": {"data": {"user_name": "John", "ids": [4, 5]}},
//!     "steps": {},
//!     "variables": {}
//! });
//!
//! assert_eq!(resolve_value(&json!("{{trigger.data.user_name}}"), &scope), json!("John"));
//! assert_eq!(resolve_value(&json!("{{ trigger.data.ids.1 }}"), &scope), json!(5));
//! assert_eq!(resolve_value(&json!("id={{ trigger.data.ids.0 }}"), &scope), json!("id=4"));
//! assert_eq!(resolve_value(&json!("{{trigger.data.missing}}"), &scope), json!(""));
//! ```

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

static TEMPLATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("valid template regex"));
static FULL_TEMPLATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\{\{\s*([^{}]*?)\s*\}\}\s*$").expect("valid template regex"));

/// Recursively resolves every template in a JSON value.
///
/// Strings are resolved per [`resolve_string`]; arrays and objects are walked
/// structurally; every other value is returned unchanged.
pub fn resolve_value(value: &Value, scope: &Value) -> Value {
    match value {
        Value::String(text) => resolve_string(text, scope),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve_value(item, scope)).collect()),
        Value::Object(map) => Value::Object(resolve_inputs(map, scope)),
        other => other.clone(),
    }
}

/// Resolves a step's input mapping.
pub fn resolve_inputs(inputs: &Map<String, Value>, scope: &Value) -> Map<String, Value> {
    inputs
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, scope)))
        .collect()
}

/// Resolves the templates in a single string.
///
/// # Returns
///
/// - the original string when it contains no template markers
/// - the referenced value, native type preserved, for a full-string template
/// - a string with each template replaced by its stringified value otherwise
pub fn resolve_string(text: &str, scope: &Value) -> Value {
    if !contains_template(text) {
        return Value::String(text.to_string());
    }

    if let Some(captures) = FULL_TEMPLATE_PATTERN.captures(text) {
        return resolve_or_default(scope, &captures[1]);
    }

    let rendered = TEMPLATE_PATTERN.replace_all(text, |captures: &Captures| {
        format_json_value(&resolve_or_default(scope, &captures[1]))
    });
    Value::String(rendered.into_owned())
}

/// Whether the string contains at least one `{{ ... }}` marker.
pub fn contains_template(text: &str) -> bool {
    TEMPLATE_PATTERN.is_match(text)
}

/// Looks up a dot separated path, returning the empty string when it cannot be resolved.
pub fn resolve_or_default(scope: &Value, path: &str) -> Value {
    lookup_path(scope, path)
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()))
}

/// Navigates a dot separated path through objects and arrays.
///
/// Numeric segments index into arrays. Returns `None` for an empty path, a
/// missing key, an out-of-range index, or traversal into a scalar.
///
/// # Examples
///
/// ```rust
/// use conduit_engine::resolve::lookup_path;
/// use serde_json::json;
///
/// let scope = json!({"steps": {"fetch": {"output": {"items": [{"id": 9}]}}}});
/// assert_eq!(lookup_path(&scope, "steps.fetch.output.items.0.id"), Some(&json!(9)));
/// assert_eq!(lookup_path(&scope, "steps.fetch.output.items.3"), None);
/// ```
pub fn lookup_path<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let mut current = scope;
    for segment in path.split('.') {
        let segment = segment.trim();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Renders a JSON value for inclusion in surrounding text.
///
/// Strings are inserted without quotes and `null` renders as the empty string.
/// Everything else uses its compact JSON form.
pub fn format_json_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
