//! Engine configuration file.
//!
//! Looked up at `$CONDUIT_CONFIG_PATH`, falling back to
//! `<config dir>/conduit/engine.json`. A missing file yields the defaults.
//! YAML is accepted for `.yaml`/`.yml` paths, JSON otherwise. Credential
//! values may reference environment variables as `${env:NAME}`.

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use conduit_types::CredentialMap;
use conduit_util::{InterpolationError, interpolate_credentials};
use dirs_next::config_dir;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::condition::ConditionPolicy;
use crate::connector::{BackoffPolicy, ConnectorCatalog, ConnectorInvoker, HttpFallback};
use crate::credentials::CredentialStore;
use crate::executor::WorkflowExecutor;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "CONDUIT_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for steps that do not declare one.
    pub default_timeout_secs: u64,
    pub backoff: BackoffPolicy,
    pub condition_policy: ConditionPolicy,
    pub user_agent: String,
    /// Global per-service credentials. Run credentials replace these per service.
    pub credentials: CredentialMap,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut services: Vec<&String> = self.credentials.keys().collect();
        services.sort();
        f.debug_struct("EngineConfig")
            .field("default_timeout_secs", &self.default_timeout_secs)
            .field("backoff", &self.backoff)
            .field("condition_policy", &self.condition_policy)
            .field("user_agent", &self.user_agent)
            .field("credential_services", &services)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            backoff: BackoffPolicy::default(),
            condition_policy: ConditionPolicy::default(),
            user_agent: format!("conduit/{}", env!("CARGO_PKG_VERSION")),
            credentials: CredentialMap::new(),
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from [`default_config_path`].
    pub fn load() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if !path.exists() {
            debug!(path = %path.display(), "no engine config file; using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_yaml = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension.eq_ignore_ascii_case("yaml") || extension.eq_ignore_ascii_case("yml"));
        let config = if is_yaml {
            Self::from_yaml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };
        debug!(path = %path.display(), ?config, "loaded engine config");
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.interpolated()
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.interpolated()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn http_client(&self) -> Result<Client, reqwest::Error> {
        Client::builder().user_agent(self.user_agent.clone()).build()
    }

    /// Wires an executor with the built-in connectors and this configuration.
    pub fn build_executor(&self) -> Result<WorkflowExecutor, reqwest::Error> {
        let client = self.http_client()?;
        let invoker = ConnectorInvoker::new(
            ConnectorCatalog::with_builtins(client.clone()),
            CredentialStore::new(self.credentials.clone()),
            HttpFallback::new(client, self.backoff),
        )
        .with_default_timeout(self.default_timeout());
        Ok(WorkflowExecutor::new(invoker).with_condition_policy(self.condition_policy))
    }

    fn interpolated(mut self) -> Result<Self, ConfigError> {
        self.credentials = interpolate_credentials(&self.credentials)?;
        Ok(self)
    }
}

/// Get the default path for the engine configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conduit")
        .join("engine.json")
}
