//! Built-in catalog connectors: `http` and `webhook`.

use async_trait::async_trait;
use conduit_types::ServiceCredentials;
use conduit_util::{bearer_token, decode_embedded_json, is_failure_status, parse_response_body, string_pairs};
use reqwest::{
    Client, Method, RequestBuilder,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde_json::{Map, Value};

use super::{ActionInfo, Connector, ConnectorError, ConnectorResult};

/// Sends the request and maps the response into a [`ConnectorResult`].
async fn send(request: RequestBuilder) -> Result<ConnectorResult, ConnectorError> {
    let response = request.send().await?;
    let status_code = response.status().as_u16();
    let text = response.text().await?;
    if is_failure_status(status_code) {
        return Ok(ConnectorResult::failure(text).with_status_code(status_code));
    }
    Ok(ConnectorResult::ok(parse_response_body(&text)).with_status_code(status_code))
}

fn required_url(inputs: &Map<String, Value>) -> Result<&str, ConnectorError> {
    inputs
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or(ConnectorError::MissingInput { name: "url" })
}

/// Collects the `headers` input. Names or values that are not valid HTTP are skipped.
pub(super) fn request_headers(inputs: &Map<String, Value>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inputs.get("headers").map(string_pairs).unwrap_or_default() {
        let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) else {
            continue;
        };
        headers.insert(name, value);
    }
    headers
}

/// `Authorization: Bearer <token>`, marked sensitive.
pub(super) fn bearer_header(token: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}")).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// Arbitrary HTTP requests; the action names the method.
///
/// Credentials select the authentication scheme through `auth_type`:
/// `bearer` (the default when a token is present), `api_key` with `key_name`
/// and `key_location` (`header` or `query`), `basic` with `username` and
/// `password`, or `none`.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Applies credential authentication. Credential headers replace user headers of the same name.
    fn authenticate(
        &self,
        mut request: RequestBuilder,
        headers: &mut HeaderMap,
        params: &mut Vec<(String, String)>,
        credentials: &ServiceCredentials,
    ) -> RequestBuilder {
        let auth_type = credentials.get("auth_type").map(String::as_str).unwrap_or("bearer");
        match auth_type {
            "bearer" => {
                if let Some(value) = bearer_token(credentials).and_then(bearer_header) {
                    headers.insert(AUTHORIZATION, value);
                }
            }
            "api_key" => {
                let key_value = credentials.get("api_key").cloned().unwrap_or_default();
                let location = credentials.get("key_location").map(String::as_str).unwrap_or("header");
                if location == "query" {
                    let key_name = credentials.get("key_name").cloned().unwrap_or_else(|| "api_key".into());
                    params.push((key_name, key_value));
                } else {
                    let key_name = credentials.get("key_name").map(String::as_str).unwrap_or("X-API-Key");
                    let name = HeaderName::from_bytes(key_name.as_bytes());
                    if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(&key_value)) {
                        headers.insert(name, value);
                    }
                }
            }
            "basic" => {
                let username = credentials.get("username").cloned().unwrap_or_default();
                headers.remove(AUTHORIZATION);
                request = request.basic_auth(username, credentials.get("password"));
            }
            _ => {}
        }
        request
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn service(&self) -> &str {
        "http"
    }

    fn actions(&self) -> Vec<ActionInfo> {
        vec![
            ActionInfo::new("get", "Make a GET request"),
            ActionInfo::new("post", "Make a POST request"),
            ActionInfo::new("put", "Make a PUT request"),
            ActionInfo::new("patch", "Make a PATCH request"),
            ActionInfo::new("delete", "Make a DELETE request"),
        ]
    }

    async fn execute(
        &self,
        action: &str,
        inputs: &Map<String, Value>,
        credentials: &ServiceCredentials,
    ) -> Result<ConnectorResult, ConnectorError> {
        let method = match action.to_ascii_lowercase().as_str() {
            "get" => Method::GET,
            "post" => Method::POST,
            "put" => Method::PUT,
            "patch" => Method::PATCH,
            "delete" => Method::DELETE,
            _ => {
                return Err(ConnectorError::InvalidMethod {
                    method: action.to_string(),
                });
            }
        };
        let url = required_url(inputs)?;

        let mut params = inputs.get("params").map(string_pairs).unwrap_or_default();
        let mut headers = request_headers(inputs);
        let request = self.authenticate(self.client.request(method, url), &mut headers, &mut params, credentials);
        let mut request = request.headers(headers);
        if !params.is_empty() {
            request = request.query(&params);
        }

        request = match inputs.get("body").map(decode_embedded_json) {
            Some(Value::String(text)) => request.body(text),
            Some(Value::Null) | None => request,
            Some(body) => request.json(&body),
        };

        send(request).await
    }
}

/// Outbound webhooks with a JSON or form-encoded payload.
#[derive(Debug, Clone)]
pub struct WebhookConnector {
    client: Client,
}

impl WebhookConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// `payload` (or `body`), decoded from JSON text when possible, else wrapped as `{"data": text}`.
    fn payload(inputs: &Map<String, Value>) -> Value {
        let payload = inputs
            .get("payload")
            .or_else(|| inputs.get("body"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        match payload {
            Value::String(text) => serde_json::from_str(&text).unwrap_or_else(|_| {
                let mut wrapped = Map::new();
                wrapped.insert("data".into(), Value::String(text));
                Value::Object(wrapped)
            }),
            other => other,
        }
    }
}

#[async_trait]
impl Connector for WebhookConnector {
    fn service(&self) -> &str {
        "webhook"
    }

    fn actions(&self) -> Vec<ActionInfo> {
        vec![
            ActionInfo::new("send", "Send a webhook with JSON payload"),
            ActionInfo::new("send_form", "Send a webhook with form data"),
        ]
    }

    async fn execute(
        &self,
        action: &str,
        inputs: &Map<String, Value>,
        _credentials: &ServiceCredentials,
    ) -> Result<ConnectorResult, ConnectorError> {
        let url = required_url(inputs)?;
        let payload = Self::payload(inputs);
        let request = self.client.post(url).headers(request_headers(inputs));

        let request = match action {
            "send" => request.json(&payload),
            "send_form" => {
                let pairs = string_pairs(&payload);
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.iter().map(|(key, value)| (key.as_str(), value.as_str())))
                    .finish();
                request
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(encoded)
            }
            other => {
                return Err(ConnectorError::UnsupportedAction {
                    service: "webhook".into(),
                    action: other.to_string(),
                });
            }
        };

        send(request).await
    }
}
