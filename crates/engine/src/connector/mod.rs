//! Connector contracts and the uniform result shape.
//!
//! A step calls `action` of `service`. The [`ConnectorInvoker`] decides who
//! serves the call: a registered [`ActionHandler`], a [`Connector`] from the
//! [`ConnectorCatalog`], or the generic [`HttpFallback`].

pub mod backoff;
pub mod builtin;
pub mod catalog;
pub mod http;
pub mod invoker;

use async_trait::async_trait;
use conduit_types::{ServiceCredentials, StepRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use backoff::BackoffPolicy;
pub use builtin::{HttpConnector, WebhookConnector};
pub use catalog::ConnectorCatalog;
pub use http::HttpFallback;
pub use invoker::{ActionHandler, ActionKey, ActionRequest, ConnectorInvoker, FnHandler, Route, handler_fn};

/// Outcome of a connector call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
}

impl ConnectorResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status_code: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            status_code: None,
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Normalizes into a step record. A successful call without data records an empty object.
    pub fn into_record(self) -> StepRecord {
        let record = if self.success {
            StepRecord::success(self.data.unwrap_or_else(|| Value::Object(Map::new())))
        } else {
            StepRecord::error(self.error.unwrap_or_else(|| "connector reported failure".to_string()))
        };
        record.with_status_code(self.status_code)
    }
}

impl From<ConnectorError> for ConnectorResult {
    fn from(error: ConnectorError) -> Self {
        ConnectorResult::failure(error.to_string())
    }
}

/// Errors raised while serving a connector call.
///
/// They never escape a step: the invoker turns them into `error` records.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Unknown service: {service}")]
    UnknownService { service: String },

    #[error("Unsupported action '{action}' for service '{service}'")]
    UnsupportedAction { service: String, action: String },

    #[error("Missing required input '{name}'")]
    MissingInput { name: &'static str },

    #[error("Invalid HTTP method: {method}")]
    InvalidMethod { method: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("handler for '{key}' panicked: {message}")]
    Panicked { key: String, message: String },

    #[error("{0}")]
    Failed(String),
}

/// Describes one action a connector offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub action: String,
    pub description: String,
}

impl ActionInfo {
    pub fn new(action: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            description: description.into(),
        }
    }
}

/// A service integration that can execute named actions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Service name the connector is registered under.
    fn service(&self) -> &str;

    fn actions(&self) -> Vec<ActionInfo>;

    async fn execute(
        &self,
        action: &str,
        inputs: &Map<String, Value>,
        credentials: &ServiceCredentials,
    ) -> Result<ConnectorResult, ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::StepStatus;
    use serde_json::json;

    #[test]
    fn success_normalizes_to_record_with_alias() {
        let record = ConnectorResult::ok(json!({"ts": "1"})).with_status_code(200).into_record();
        assert_eq!(record.status, StepStatus::Success);
        assert_eq!(record.data, Some(json!({"ts": "1"})));
        assert_eq!(record.output, record.data);
        assert_eq!(record.status_code, Some(200));
    }

    #[test]
    fn failure_without_message_gets_default_error() {
        let result = ConnectorResult {
            success: false,
            data: None,
            error: None,
            status_code: None,
        };
        let record = result.into_record();
        assert_eq!(record.status, StepStatus::Error);
        assert_eq!(record.error.as_deref(), Some("connector reported failure"));
    }

    #[test]
    fn connector_errors_convert_to_failures() {
        let result: ConnectorResult = ConnectorError::UnknownService { service: "x".into() }.into();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown service: x"));
    }
}
