//! Shared type definitions for conduit workflows and their executions.
//!
//! The engine, CLI, and any external collaborators (schedulers, webhook
//! ingress, persistence) exchange these models as plain serde values.

pub mod execution;
pub mod workflow;

pub use execution::{
    ExecutionStatus, REASON_CONDITION_NOT_MET, REASON_DEPENDENCY_FAILED, StepRecord, StepStatus, WorkflowExecution,
};
pub use workflow::{BackoffStrategy, RetryConfig, Trigger, TriggerType, Workflow, WorkflowStatus, WorkflowStep};

use std::collections::HashMap;

/// Credential fields for one service, e.g. `{"api_key": "..."}`.
pub type ServiceCredentials = HashMap<String, String>;
/// Credentials for every service a run may call, keyed by service name.
pub type CredentialMap = HashMap<String, ServiceCredentials>;
