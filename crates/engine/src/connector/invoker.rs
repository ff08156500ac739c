//! Dispatch of step actions to handlers, catalog connectors, or raw HTTP.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use conduit_types::{RetryConfig, ServiceCredentials, StepRecord, WorkflowStep};
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Connector, ConnectorCatalog, ConnectorError, ConnectorResult, HttpFallback};
use crate::context::ExecutionContext;
use crate::credentials::CredentialStore;

/// Default per-step timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// `(service, action)` pair identifying a custom handler. Displays as `service:action`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub service: String,
    pub action: String,
}

impl ActionKey {
    pub fn new(service: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.action)
    }
}

/// Everything a custom handler receives for one call.
#[derive(Debug, Clone, Copy)]
pub struct ActionRequest<'a> {
    pub service: &'a str,
    pub action: &'a str,
    /// Inputs with templates already resolved.
    pub inputs: &'a Map<String, Value>,
    pub credentials: &'a ServiceCredentials,
    pub context: &'a ExecutionContext,
}

/// Custom implementation of one `service:action`.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(&self, request: ActionRequest<'_>) -> Result<ConnectorResult, ConnectorError>;
}

/// Adapts an async closure over owned inputs and credentials into an [`ActionHandler`].
pub struct FnHandler<F>(F);

/// Wraps `handler` so it can be registered with [`ConnectorInvoker::register_handler`].
pub fn handler_fn<F, Fut>(handler: F) -> FnHandler<F>
where
    F: Fn(Map<String, Value>, ServiceCredentials) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ConnectorResult, ConnectorError>> + Send,
{
    FnHandler(handler)
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>, ServiceCredentials) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ConnectorResult, ConnectorError>> + Send,
{
    async fn invoke(&self, request: ActionRequest<'_>) -> Result<ConnectorResult, ConnectorError> {
        (self.0)(request.inputs.clone(), request.credentials.clone()).await
    }
}

/// Who serves a given `(service, action)`, in precedence order.
#[derive(Clone)]
pub enum Route {
    Handler(Arc<dyn ActionHandler>),
    Catalog(Arc<dyn Connector>),
    Http,
}

impl Route {
    pub fn kind(&self) -> &'static str {
        match self {
            Route::Handler(_) => "handler",
            Route::Catalog(_) => "catalog",
            Route::Http => "http",
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Per-call limits taken from the step definition.
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub retry: RetryConfig,
    pub timeout: Duration,
}

/// Uniform entry point for "call action A of service S with inputs I".
pub struct ConnectorInvoker {
    handlers: RwLock<HashMap<ActionKey, Arc<dyn ActionHandler>>>,
    catalog: ConnectorCatalog,
    credentials: CredentialStore,
    http: HttpFallback,
    default_timeout: Duration,
}

impl fmt::Debug for ConnectorInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<String> = self.read_handlers().keys().map(ToString::to_string).collect();
        handlers.sort();
        f.debug_struct("ConnectorInvoker")
            .field("handlers", &handlers)
            .field("catalog", &self.catalog)
            .field("credentials", &self.credentials)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ConnectorInvoker {
    pub fn new(catalog: ConnectorCatalog, credentials: CredentialStore, http: HttpFallback) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            catalog,
            credentials,
            http,
            default_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Timeout used for steps that do not declare one.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &ConnectorCatalog {
        &self.catalog
    }

    /// Installs a custom handler for `service:action`, replacing any previous one.
    pub fn register_handler(
        &self,
        service: impl Into<String>,
        action: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) {
        let key = ActionKey::new(service, action);
        debug!(handler = %key, "registered action handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, handler);
    }

    pub fn unregister_handler(&self, service: &str, action: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ActionKey::new(service, action))
            .is_some()
    }

    /// Resolves the dispatch target: custom handler, then catalog, then HTTP.
    pub fn route(&self, service: &str, action: &str) -> Route {
        if let Some(handler) = self.read_handlers().get(&ActionKey::new(service, action)) {
            return Route::Handler(Arc::clone(handler));
        }
        match self.catalog.get(service) {
            Some(connector) => Route::Catalog(connector),
            None => Route::Http,
        }
    }

    /// Runs a step's action and normalizes the outcome into a step record.
    ///
    /// Credentials supplied with the run win over the global store for the
    /// step's service. Failures of any kind, including timeouts and handler
    /// panics, come back as `error` records.
    pub async fn invoke_step(&self, step: &WorkflowStep, inputs: &Map<String, Value>, context: &ExecutionContext) -> StepRecord {
        let credentials = self.credentials.resolve(&step.service, context.credentials_for(&step.service));
        let options = CallOptions {
            retry: step.retry_config,
            timeout: step
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.default_timeout),
        };
        self.invoke(&step.service, &step.action, inputs, &credentials, options, context)
            .await
            .into_record()
    }

    /// Calls `action` of `service`.
    pub async fn invoke(
        &self,
        service: &str,
        action: &str,
        inputs: &Map<String, Value>,
        credentials: &ServiceCredentials,
        options: CallOptions,
        context: &ExecutionContext,
    ) -> ConnectorResult {
        let route = self.route(service, action);
        debug!(service, action, route = route.kind(), "dispatching action");

        match route {
            Route::Handler(handler) => {
                let key = ActionKey::new(service, action);
                let request = ActionRequest {
                    service,
                    action,
                    inputs,
                    credentials,
                    context,
                };
                guarded(&key, options.timeout, handler.invoke(request)).await
            }
            Route::Catalog(connector) => {
                let key = ActionKey::new(service, action);
                guarded(&key, options.timeout, connector.execute(action, inputs, credentials)).await
            }
            Route::Http => {
                self.http
                    .execute(inputs, credentials, &options.retry, options.timeout)
                    .await
            }
        }
    }

    fn read_handlers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ActionKey, Arc<dyn ActionHandler>>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounds a call by `timeout` and converts panics and errors into failed results.
async fn guarded<F>(key: &ActionKey, timeout: Duration, call: F) -> ConnectorResult
where
    F: Future<Output = Result<ConnectorResult, ConnectorError>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await {
        Err(_) => ConnectorError::Timeout {
            seconds: timeout.as_secs(),
        }
        .into(),
        Ok(Err(payload)) => ConnectorError::Panicked {
            key: key.to_string(),
            message: panic_message(payload.as_ref()),
        }
        .into(),
        Ok(Ok(Err(error))) => error.into(),
        Ok(Ok(Ok(result))) => result,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ActionInfo, BackoffPolicy};
    use crate::test_support::{MockResponse, MockServer};
    use conduit_types::{CredentialMap, StepStatus};
    use serde_json::json;

    struct EchoConnector;

    #[async_trait]
    impl Connector for EchoConnector {
        fn service(&self) -> &str {
            "echo"
        }

        fn actions(&self) -> Vec<ActionInfo> {
            vec![ActionInfo::new("say", "Echo inputs back")]
        }

        async fn execute(
            &self,
            action: &str,
            inputs: &Map<String, Value>,
            credentials: &ServiceCredentials,
        ) -> Result<ConnectorResult, ConnectorError> {
            match action {
                "say" => Ok(ConnectorResult::ok(json!({
                    "inputs": inputs,
                    "token": credentials.get("token"),
                }))),
                "fail" => Ok(ConnectorResult::failure("echo refused")),
                other => Err(ConnectorError::UnsupportedAction {
                    service: "echo".into(),
                    action: other.into(),
                }),
            }
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl ActionHandler for SlowHandler {
        async fn invoke(&self, _request: ActionRequest<'_>) -> Result<ConnectorResult, ConnectorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ConnectorResult::ok(json!(null)))
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl ActionHandler for PanickingHandler {
        async fn invoke(&self, _request: ActionRequest<'_>) -> Result<ConnectorResult, ConnectorError> {
            panic!("handler exploded");
        }
    }

    fn invoker(global: CredentialMap) -> ConnectorInvoker {
        let mut catalog = ConnectorCatalog::new();
        catalog.register(Arc::new(EchoConnector));
        ConnectorInvoker::new(
            catalog,
            CredentialStore::new(global),
            HttpFallback::new(reqwest::Client::new(), BackoffPolicy::immediate()),
        )
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("exec", "wf", json!({}))
    }

    #[test]
    fn routes_prefer_handlers_then_catalog_then_http() {
        let invoker = invoker(CredentialMap::new());
        assert_eq!(invoker.route("echo", "say").kind(), "catalog");
        assert_eq!(invoker.route("slack", "post").kind(), "http");

        invoker.register_handler("echo", "say", Arc::new(handler_fn(|_, _| async { Ok(ConnectorResult::ok(json!("custom"))) })));
        assert_eq!(invoker.route("echo", "say").kind(), "handler");
        assert_eq!(invoker.route("echo", "other").kind(), "catalog");

        assert!(invoker.unregister_handler("echo", "say"));
        assert_eq!(invoker.route("echo", "say").kind(), "catalog");
    }

    #[tokio::test]
    async fn handler_result_is_normalized() {
        let invoker = invoker(CredentialMap::new());
        invoker.register_handler(
            "crm",
            "lookup",
            Arc::new(handler_fn(|inputs, _| async move {
                Ok(ConnectorResult::ok(json!({"email": inputs.get("email").cloned()})))
            })),
        );
        let step = WorkflowStep::new("find", "crm", "lookup");
        let inputs = json!({"email": "a@b.c"}).as_object().cloned().expect("object");

        let record = invoker.invoke_step(&step, &inputs, &context()).await;
        assert_eq!(record.status, StepStatus::Success);
        assert_eq!(record.output, Some(json!({"email": "a@b.c"})));
    }

    #[tokio::test]
    async fn catalog_connector_receives_run_credentials_first() {
        let mut global = CredentialMap::new();
        global.insert("echo".into(), [("token".to_string(), "global".to_string())].into_iter().collect());
        let invoker = invoker(global);
        let step = WorkflowStep::new("talk", "echo", "say");

        let record = invoker.invoke_step(&step, &Map::new(), &context()).await;
        assert_eq!(record.data.as_ref().map(|data| data["token"].clone()), Some(json!("global")));

        let mut run_credentials = CredentialMap::new();
        run_credentials.insert("echo".into(), [("token".to_string(), "run".to_string())].into_iter().collect());
        let context = context().with_credentials(run_credentials);
        let record = invoker.invoke_step(&step, &Map::new(), &context).await;
        assert_eq!(record.data.as_ref().map(|data| data["token"].clone()), Some(json!("run")));
    }

    #[tokio::test]
    async fn catalog_failures_become_error_records() {
        let invoker = invoker(CredentialMap::new());
        let record = invoker
            .invoke_step(&WorkflowStep::new("x", "echo", "fail"), &Map::new(), &context())
            .await;
        assert_eq!(record.status, StepStatus::Error);
        assert_eq!(record.error.as_deref(), Some("echo refused"));

        let record = invoker
            .invoke_step(&WorkflowStep::new("y", "echo", "dance"), &Map::new(), &context())
            .await;
        assert_eq!(record.error.as_deref(), Some("Unsupported action 'dance' for service 'echo'"));
    }

    #[tokio::test]
    async fn step_timeout_yields_error_record() {
        let invoker = invoker(CredentialMap::new());
        invoker.register_handler("slow", "wait", Arc::new(SlowHandler));
        let step = WorkflowStep::new("wait", "slow", "wait").with_timeout_secs(1);

        let record = invoker.invoke_step(&step, &Map::new(), &context()).await;
        assert_eq!(record.status, StepStatus::Error);
        assert_eq!(record.error.as_deref(), Some("timed out after 1s"));
    }

    #[tokio::test]
    async fn handler_panic_yields_error_record() {
        let invoker = invoker(CredentialMap::new());
        invoker.register_handler("boom", "go", Arc::new(PanickingHandler));

        let record = invoker
            .invoke_step(&WorkflowStep::new("go", "boom", "go"), &Map::new(), &context())
            .await;
        assert_eq!(record.status, StepStatus::Error);
        assert_eq!(record.error.as_deref(), Some("handler for 'boom:go' panicked: handler exploded"));
    }

    #[tokio::test]
    async fn unknown_service_falls_back_to_http() {
        let server = MockServer::start(vec![MockResponse::json(200, json!({"sent": true}))]).await;
        let mut global = CredentialMap::new();
        global.insert("slack".into(), [("api_key".to_string(), "xoxb".to_string())].into_iter().collect());
        let invoker = invoker(global);
        let step = WorkflowStep::new("notify", "slack", "post_message");
        let inputs = json!({"url": server.url("/api/chat.postMessage"), "body": {"text": "hi"}})
            .as_object()
            .cloned()
            .expect("object");

        let record = invoker.invoke_step(&step, &inputs, &context()).await;
        assert_eq!(record.status, StepStatus::Success);
        assert_eq!(record.status_code, Some(200));
        assert_eq!(server.requests()[0].header("authorization").as_deref(), Some("Bearer xoxb"));
    }
}
