//! Generic HTTP action used for services without a connector.
//!
//! Inputs:
//!
//! - `url` (required)
//! - `method`, default `POST`
//! - `headers`, `params` as objects (or JSON text)
//! - `body`, sent as JSON for `POST`, `PUT` and `PATCH`
//!
//! A bearer token taken from `api_key`, `access_token` or `token` is sent as
//! the `Authorization` header, replacing any user-supplied one. Responses with status >= 400 and transport
//! failures are retried with backoff; when attempts run out the call returns
//! an error result rather than failing.

use std::time::Duration;

use conduit_types::{RetryConfig, ServiceCredentials};
use conduit_util::{bearer_token, decode_embedded_json, is_failure_status, parse_response_body, redact_sensitive, string_pairs};
use reqwest::{Client, Method, header::AUTHORIZATION};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::builtin::{bearer_header, request_headers};
use super::{BackoffPolicy, ConnectorError, ConnectorResult};

/// Issues raw HTTP requests with retry and backoff.
#[derive(Debug, Clone)]
pub struct HttpFallback {
    client: Client,
    backoff: BackoffPolicy,
}

enum AttemptOutcome {
    Done(ConnectorResult),
    Retryable(ConnectorResult),
}

impl HttpFallback {
    pub fn new(client: Client, backoff: BackoffPolicy) -> Self {
        Self { client, backoff }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Performs the request described by `inputs`.
    ///
    /// Makes at most `retry.max_retries` attempts (at least one). `timeout` bounds
    /// each attempt. No delay follows the final attempt.
    pub async fn execute(
        &self,
        inputs: &Map<String, Value>,
        credentials: &ServiceCredentials,
        retry: &RetryConfig,
        timeout: Duration,
    ) -> ConnectorResult {
        let url = match inputs.get("url").and_then(Value::as_str).map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => return ConnectorError::MissingInput { name: "url" }.into(),
        };
        let method_name = inputs
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("POST")
            .trim()
            .to_ascii_uppercase();
        let Ok(method) = Method::from_bytes(method_name.as_bytes()) else {
            return ConnectorError::InvalidMethod { method: method_name }.into();
        };

        let attempts = retry.max_retries.max(1);
        let mut last_result = ConnectorResult::failure("Max retries exceeded");
        for attempt in 0..attempts {
            match self.attempt(&method, &url, inputs, credentials, timeout).await {
                AttemptOutcome::Done(result) => return result,
                AttemptOutcome::Retryable(result) => {
                    let is_last = attempt + 1 == attempts;
                    warn!(
                        url = %url,
                        attempt = attempt + 1,
                        attempts,
                        status_code = ?result.status_code,
                        error = %redact_sensitive(result.error.as_deref().unwrap_or_default()),
                        "http action attempt failed"
                    );
                    last_result = result;
                    if !is_last {
                        tokio::time::sleep(self.backoff.delay_for(retry.backoff, attempt)).await;
                    }
                }
            }
        }
        last_result
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        inputs: &Map<String, Value>,
        credentials: &ServiceCredentials,
        timeout: Duration,
    ) -> AttemptOutcome {
        let mut headers = request_headers(inputs);
        if let Some(value) = bearer_token(credentials).and_then(bearer_header) {
            headers.insert(AUTHORIZATION, value);
        }
        let mut request = self.client.request(method.clone(), url).timeout(timeout).headers(headers);

        let params = inputs.get("params").map(string_pairs).unwrap_or_default();
        if !params.is_empty() {
            request = request.query(&params);
        }

        if matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
            let body = inputs
                .get("body")
                .map(decode_embedded_json)
                .unwrap_or_else(|| Value::Object(Map::new()));
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => return AttemptOutcome::Retryable(transport_failure(error, timeout)),
        };

        let status_code = response.status().as_u16();
        let text = match response.text().await {
            Ok(text) => text,
            Err(error) => {
                return AttemptOutcome::Retryable(transport_failure(error, timeout).with_status_code(status_code));
            }
        };

        if is_failure_status(status_code) {
            return AttemptOutcome::Retryable(ConnectorResult::failure(text).with_status_code(status_code));
        }

        debug!(url, status_code, "http action succeeded");
        AttemptOutcome::Done(ConnectorResult::ok(parse_response_body(&text)).with_status_code(status_code))
    }
}

fn transport_failure(error: reqwest::Error, timeout: Duration) -> ConnectorResult {
    if error.is_timeout() {
        ConnectorError::Timeout {
            seconds: timeout.as_secs(),
        }
        .into()
    } else {
        ConnectorError::Transport(error).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockResponse, MockServer};
    use conduit_types::BackoffStrategy;
    use serde_json::json;

    fn fallback() -> HttpFallback {
        HttpFallback::new(Client::new(), BackoffPolicy::immediate())
    }

    fn retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            backoff: BackoffStrategy::Exponential,
        }
    }

    #[tokio::test]
    async fn parses_json_success_and_sends_bearer_token() {
        let server = MockServer::start(vec![MockResponse::json(200, json!({"ok": true}))]).await;
        let inputs = json!({
            "url": server.url("/hook"),
            "method": "post",
            "headers": {"X-Trace": "abc"},
            "params": {"page": 2},
            "body": {"text": "hi"}
        });
        let mut credentials = ServiceCredentials::new();
        credentials.insert("access_token".into(), "tok".into());

        let result = fallback()
            .execute(inputs.as_object().expect("object"), &credentials, &retry(3), Duration::from_secs(5))
            .await;

        assert!(result.success, "unexpected failure: {:?}", result.error);
        assert_eq!(result.data, Some(json!({"ok": true})));
        assert_eq!(result.status_code, Some(200));

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/hook");
        assert_eq!(requests[0].query.as_deref(), Some("page=2"));
        assert_eq!(requests[0].header("authorization").as_deref(), Some("Bearer tok"));
        assert_eq!(requests[0].header("x-trace").as_deref(), Some("abc"));
        assert_eq!(requests[0].json_body(), Some(json!({"text": "hi"})));
    }

    #[tokio::test]
    async fn non_json_body_is_wrapped_as_raw() {
        let server = MockServer::start(vec![MockResponse::text(200, "pong")]).await;
        let inputs = json!({"url": server.url("/ping"), "method": "GET"});
        let result = fallback()
            .execute(inputs.as_object().expect("object"), &ServiceCredentials::new(), &retry(1), Duration::from_secs(5))
            .await;
        assert_eq!(result.data, Some(json!({"raw": "pong"})));
    }

    #[tokio::test]
    async fn retries_server_errors_until_exhausted() {
        let server = MockServer::start(vec![MockResponse::text(500, "boom")]).await;
        let inputs = json!({"url": server.url("/fail")});
        let result = fallback()
            .execute(inputs.as_object().expect("object"), &ServiceCredentials::new(), &retry(3), Duration::from_secs(5))
            .await;

        assert!(!result.success);
        assert_eq!(result.status_code, Some(500));
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(server.hits(), 3);
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let server = MockServer::start(vec![
            MockResponse::text(503, "busy"),
            MockResponse::json(201, json!({"id": 1})),
        ])
        .await;
        let inputs = json!({"url": server.url("/create")});
        let result = fallback()
            .execute(inputs.as_object().expect("object"), &ServiceCredentials::new(), &retry(3), Duration::from_secs(5))
            .await;

        assert!(result.success);
        assert_eq!(result.status_code, Some(201));
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn zero_retries_still_makes_one_attempt() {
        let server = MockServer::start(vec![MockResponse::text(404, "nope")]).await;
        let inputs = json!({"url": server.url("/missing"), "method": "GET"});
        let result = fallback()
            .execute(inputs.as_object().expect("object"), &ServiceCredentials::new(), &retry(0), Duration::from_secs(5))
            .await;
        assert!(!result.success);
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn missing_url_fails_without_request() {
        let result = fallback()
            .execute(&Map::new(), &ServiceCredentials::new(), &retry(3), Duration::from_secs(1))
            .await;
        assert_eq!(result.error.as_deref(), Some("Missing required input 'url'"));
    }

    #[tokio::test]
    async fn credential_token_replaces_user_authorization_header() {
        let server = MockServer::start(vec![MockResponse::json(200, json!({}))]).await;
        let inputs = json!({
            "url": server.url("/me"),
            "method": "GET",
            "headers": {"Authorization": "Basic abc"}
        });
        let mut credentials = ServiceCredentials::new();
        credentials.insert("api_key".into(), "tok".into());

        fallback()
            .execute(inputs.as_object().expect("object"), &credentials, &retry(1), Duration::from_secs(5))
            .await;

        assert_eq!(server.requests()[0].header("authorization").as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn user_authorization_header_is_kept_without_credentials() {
        let server = MockServer::start(vec![MockResponse::json(200, json!({}))]).await;
        let inputs = json!({
            "url": server.url("/me"),
            "method": "GET",
            "headers": {"Authorization": "Basic abc", "Bad Name": "x"}
        });

        let result = fallback()
            .execute(inputs.as_object().expect("object"), &ServiceCredentials::new(), &retry(1), Duration::from_secs(5))
            .await;

        assert!(result.success);
        assert_eq!(server.requests()[0].header("authorization").as_deref(), Some("Basic abc"));
    }

    #[tokio::test]
    async fn attempt_timeout_is_retried_and_reported() {
        let server =
            MockServer::start(vec![MockResponse::json(200, json!({"ok": true})).with_delay(Duration::from_secs(2))]).await;
        let inputs = json!({"url": server.url("/slow"), "method": "GET"});

        let result = fallback()
            .execute(inputs.as_object().expect("object"), &ServiceCredentials::new(), &retry(2), Duration::from_secs(1))
            .await;

        assert!(!result.success);
        assert!(result.status_code.is_none());
        assert_eq!(result.error.as_deref(), Some("timed out after 1s"));
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn https_urls_reach_the_connect_step() {
        let error = Client::new()
            .get("https://127.0.0.1:1/x")
            .send()
            .await
            .expect_err("nothing listens on port 1");

        let mut source: Option<&dyn std::error::Error> = Some(&error);
        while let Some(current) = source {
            assert!(
                !current.to_string().contains("scheme is not http"),
                "https is unsupported by the client: {current}"
            );
            source = current.source();
        }
    }

    #[tokio::test]
    async fn transport_errors_are_retried_then_reported() {
        let inputs = json!({"url": "http://127.0.0.1:9/unreachable", "method": "GET"});
        let result = fallback()
            .execute(inputs.as_object().expect("object"), &ServiceCredentials::new(), &retry(2), Duration::from_secs(2))
            .await;
        assert!(!result.success);
        assert!(result.status_code.is_none());
        assert!(result.error.is_some());
    }
}
