//! # Conduit Engine
//!
//! Executes workflows: directed graphs of steps that call actions on external
//! services, pass data between steps through `{{ ... }}` templates, and branch
//! on simple conditions.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conduit_engine::{EngineConfig, parse_workflow_file};
//! use conduit_types::CredentialMap;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let workflow = parse_workflow_file("onboarding.yaml")?;
//! conduit_engine::ensure_valid(&workflow)?;
//!
//! let executor = EngineConfig::load()?.build_executor()?;
//! let execution = executor
//!     .execute(&workflow, serde_json::json!({"email": "ada@example.com"}), CredentialMap::new())
//!     .await;
//! println!("{:?}", execution.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`resolve`**: template resolution against the run scope
//! - **`condition`**: the step condition language
//! - **`executor`**: planning (topological order), the run loop, lifecycle hooks
//! - **`connector`**: handler table, connector catalog, and the HTTP fallback
//! - **`validation`**: definition-time checks
//! - **`registry`**: stored workflow definitions
//! - **`journal`**: per-execution event log
//! - **`config`**: engine configuration file

use std::{fs, path::Path};

use anyhow::{Context, Result};
use conduit_types::Workflow;

pub mod condition;
pub mod config;
pub mod connector;
pub mod context;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod journal;
pub mod registry;
pub mod resolve;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use condition::{ConditionEvaluator, ConditionPolicy, evaluate_condition};
pub use config::{ConfigError, EngineConfig, default_config_path};
pub use connector::{
    ActionHandler, ActionRequest, BackoffPolicy, Connector, ConnectorCatalog, ConnectorError, ConnectorInvoker, ConnectorResult,
    HttpFallback, handler_fn,
};
pub use context::ExecutionContext;
pub use credentials::CredentialStore;
pub use error::EngineError;
pub use executor::{ExecutionHooks, PlanError, RunRequest, WorkflowExecutor, plan};
pub use journal::{ExecutionJournal, JournalEntry, JournalLevel};
pub use registry::WorkflowRegistry;
pub use resolve::{resolve_inputs, resolve_value};
pub use validation::{InvalidWorkflow, ValidationError, ensure_valid, validate_workflow};

/// Loads a workflow definition from a file.
///
/// `.json` files are parsed as JSON; anything else as YAML.
pub fn parse_workflow_file(file_path: impl AsRef<Path>) -> Result<Workflow> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read workflow file: {}", file_path.display()))?;
    parse_workflow_str(&content, is_json_path(file_path)).with_context(|| format!("Invalid workflow file: {}", file_path.display()))
}

/// Parses a workflow definition from text.
pub fn parse_workflow_str(content: &str, json: bool) -> Result<Workflow> {
    if json {
        Ok(Workflow::from_json_str(content)?)
    } else {
        Ok(Workflow::from_yaml_str(content)?)
    }
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
}
