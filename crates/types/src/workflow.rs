//! Strongly typed workflow definitions shared by the engine, CLI, and storage layers.
//!
//! Steps keep the order in which they were authored. The scheduler relies on that
//! order to break ties between steps that become ready at the same time, so the
//! collections here are `Vec`/`IndexMap` rather than hashed maps.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event source that starts a workflow run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Inbound webhook delivered by a third-party service.
    Webhook,
    /// Cron expression evaluated by an external scheduler.
    Schedule,
    /// Explicit invocation by a user or API caller.
    #[default]
    Manual,
    /// Periodic polling of a remote API.
    ApiPoll,
}

/// Lifecycle state of a stored workflow definition.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
    Fixed,
}

/// Retry settings applied to the HTTP fallback of a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total number of attempts made before the step is recorded as an error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How the delay grows between attempts.
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: BackoffStrategy::default(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

/// Describes what starts a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    /// Kind of event source.
    #[serde(rename = "type", alias = "trigger_type", default)]
    pub trigger_type: TriggerType,
    /// Service emitting the event (webhook and polling triggers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Event name used for webhook matching, e.g. `issue.opened`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Cron expression for schedule triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Poll interval in seconds for `api_poll` triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    /// Free-form configuration consumed by the trigger source.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
}

impl Trigger {
    /// Ingress path for webhook triggers, e.g. `/webhooks/github/issue/opened`.
    ///
    /// Returns `None` for non-webhook triggers or when service or event is missing.
    pub fn webhook_path(&self) -> Option<String> {
        if self.trigger_type != TriggerType::Webhook {
            return None;
        }
        let service = self.service.as_deref()?;
        let event = self.event.as_deref()?;
        Some(format!("/webhooks/{}/{}", service, event.replace('.', "/")))
    }

    /// Whether this trigger listens for `event` from `service`.
    pub fn matches_webhook(&self, service: &str, event: &str) -> bool {
        self.trigger_type == TriggerType::Webhook
            && self.service.as_deref() == Some(service)
            && self.event.as_deref() == Some(event)
    }
}

/// One unit of work: calls `action` on `service` with templated inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    /// Identifier, unique within the owning workflow.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Target service, e.g. `slack` or `http`.
    pub service: String,
    /// Action name within the service.
    pub action: String,
    /// Input values; strings may contain `{{ path }}` references.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Declared output fields. Informational only.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub outputs: Map<String, Value>,
    /// Steps that must finish before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional expression; the step is skipped when it evaluates false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub retry_config: RetryConfig,
    /// Timeout in seconds. Falls back to the engine default when absent.
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, service: impl Into<String>, action: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            service: service.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        if let Value::Object(map) = inputs {
            self.inputs = map;
        }
        self
    }

    pub fn with_depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_retry(mut self, max_retries: u32, backoff: BackoffStrategy) -> Self {
        self.retry_config = RetryConfig { max_retries, backoff };
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// A named graph of steps plus an optional trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    /// Identifier; generated when a definition omits it.
    #[serde(default = "generate_workflow_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Absent for manual-only workflows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn generate_workflow_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Default for Workflow {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: generate_workflow_id(),
            name: String::new(),
            description: None,
            trigger: None,
            steps: Vec::new(),
            status: WorkflowStatus::Draft,
            owner_id: None,
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
            metadata: Map::new(),
        }
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.into(),
            steps,
            ..Default::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Looks up a step by identifier.
    pub fn get_step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    /// Services referenced by the steps and the trigger, sorted and deduplicated.
    ///
    /// Credential suppliers use this to decide which service credentials a run needs.
    pub fn services(&self) -> BTreeSet<String> {
        let mut services: BTreeSet<String> = self.steps.iter().map(|step| step.service.clone()).collect();
        if let Some(service) = self.trigger.as_ref().and_then(|trigger| trigger.service.clone()) {
            services.insert(service);
        }
        services
    }

    pub fn activate(&mut self) {
        self.set_status(WorkflowStatus::Active);
    }

    pub fn deactivate(&mut self) {
        self.set_status(WorkflowStatus::Paused);
    }

    pub fn archive(&mut self) {
        self.set_status(WorkflowStatus::Archived);
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    fn set_status(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
