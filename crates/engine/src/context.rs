//! Per-run execution state.

use conduit_types::{CredentialMap, ServiceCredentials, StepRecord, StepStatus};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};

/// Mutable state owned by exactly one workflow run.
///
/// Step results are kept in completion order. Templates and conditions read the
/// context through [`ExecutionContext::scope`], which exposes the `trigger`,
/// `steps` and `variables` roots.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub trigger_data: Value,
    pub steps: IndexMap<String, StepRecord>,
    pub variables: Map<String, Value>,
    /// Run-supplied credentials; these take precedence over globally configured ones.
    pub credentials: CredentialMap,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>, workflow_id: impl Into<String>, trigger_data: Value) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            trigger_data,
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialMap) -> Self {
        self.credentials = credentials;
        self
    }

    /// Appends a step result. Later steps can reference it immediately.
    pub fn record(&mut self, step_id: impl Into<String>, record: StepRecord) {
        self.steps.insert(step_id.into(), record);
    }

    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.steps.get(step_id).map(|record| record.status)
    }

    pub fn credentials_for(&self, service: &str) -> Option<&ServiceCredentials> {
        self.credentials.get(service)
    }

    /// Builds the template scope: `{"trigger": {"data": ..}, "steps": {..}, "variables": {..}}`.
    pub fn scope(&self) -> Value {
        let steps: Map<String, Value> = self
            .steps
            .iter()
            .map(|(step_id, record)| (step_id.clone(), serde_json::to_value(record).unwrap_or_default()))
            .collect();

        json!({
            "trigger": {"data": self.trigger_data},
            "steps": steps,
            "variables": self.variables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::resolve_value;

    #[test]
    fn scope_exposes_step_payload_under_data_and_output() {
        let mut context = ExecutionContext::new("exec-1", "wf-1", json!({"user": "ada"}));
        context.record("fetch", StepRecord::success(json!({"id": 42})));

        let scope = context.scope();
        assert_eq!(resolve_value(&json!("{{steps.fetch.output.id}}"), &scope), json!(42));
        assert_eq!(resolve_value(&json!("{{steps.fetch.data.id}}"), &scope), json!(42));
        assert_eq!(resolve_value(&json!("{{steps.fetch.status}}"), &scope), json!("success"));
        assert_eq!(resolve_value(&json!("{{trigger.data.user}}"), &scope), json!("ada"));
    }

    #[test]
    fn steps_keep_completion_order() {
        let mut context = ExecutionContext::new("exec-1", "wf-1", json!({}));
        context.record("b", StepRecord::success(json!(1)));
        context.record("a", StepRecord::skipped("condition not met"));

        let order: Vec<&str> = context.steps.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(context.step_status("a"), Some(StepStatus::Skipped));
        assert_eq!(context.step_status("missing"), None);
    }

    #[test]
    fn variables_are_addressable() {
        let mut variables = Map::new();
        variables.insert("channel".into(), json!("#ops"));
        let context = ExecutionContext::new("e", "w", json!({})).with_variables(variables);
        assert_eq!(resolve_value(&json!("{{variables.channel}}"), &context.scope()), json!("#ops"));
    }
}
