//! Execution records produced by a workflow run.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Skip reason recorded when an upstream step did not succeed.
pub const REASON_DEPENDENCY_FAILED: &str = "dependency failed";
/// Skip reason recorded when a step condition evaluated false.
pub const REASON_CONDITION_NOT_MET: &str = "condition not met";

/// Terminal status of a single step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
    Skipped,
}

impl StepStatus {
    /// Whether downstream steps may run after a dependency ended in this status.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Skipped)
    }
}

/// Result recorded for one step of a run.
///
/// Success payloads are stored under both `data` and `output` so templates may
/// reference either `steps.<id>.data` or `steps.<id>.output`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// HTTP status of the underlying call, when one was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl StepRecord {
    pub fn success(data: Value) -> Self {
        Self {
            status: StepStatus::Success,
            output: Some(data.clone()),
            data: Some(data),
            error: None,
            reason: None,
            status_code: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Error,
            data: None,
            output: None,
            error: Some(message.into()),
            reason: None,
            status_code: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            data: None,
            output: None,
            error: None,
            reason: Some(reason.into()),
            status_code: None,
        }
    }

    pub fn with_status_code(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == StepStatus::Error
    }

    pub fn is_skipped(&self) -> bool {
        self.status == StepStatus::Skipped
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Record of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub trigger_data: Value,
    /// Snapshot of the template scope (`trigger`, `steps`, `variables`) at the end of the run.
    #[serde(default)]
    pub context: Value,
    /// Step results in completion order.
    #[serde(default)]
    pub step_results: IndexMap<String, StepRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// Creates a pending record with a fresh execution id.
    pub fn new(workflow_id: impl Into<String>, trigger_data: Value) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            trigger_data,
            context: Value::Null,
            step_results: IndexMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Utc::now();
    }

    pub fn record_step(&mut self, step_id: impl Into<String>, record: StepRecord) {
        self.step_results.insert(step_id.into(), record);
    }

    /// Moves the run to its terminal status.
    ///
    /// The run completes only when every recorded step succeeded or was skipped
    /// and no run-level error was set.
    pub fn finish(&mut self) {
        let any_step_failed = self.step_results.values().any(StepRecord::is_error);
        self.status = if self.error.is_some() || any_step_failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        self.completed_at = Some(Utc::now());
    }

    /// Marks the whole run failed with a top-level error, keeping completed step results.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|completed_at| (completed_at - self.started_at).num_milliseconds())
    }

    pub fn step_count_by_status(&self, status: StepStatus) -> usize {
        self.step_results.values().filter(|record| record.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_record_aliases_payload_under_data_and_output() {
        let record = StepRecord::success(json!({"id": 7}));
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value, json!({"status": "success", "data": {"id": 7}, "output": {"id": 7}}));
    }

    #[test]
    fn skipped_record_only_carries_reason() {
        let value = serde_json::to_value(StepRecord::skipped(REASON_CONDITION_NOT_MET)).expect("serialize");
        assert_eq!(value, json!({"status": "skipped", "reason": "condition not met"}));
    }

    #[test]
    fn finish_completes_when_steps_succeed_or_skip() {
        let mut execution = WorkflowExecution::new("wf", json!({}));
        execution.start();
        execution.record_step("a", StepRecord::success(json!(1)));
        execution.record_step("b", StepRecord::skipped(REASON_CONDITION_NOT_MET));
        execution.finish();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.duration_ms().is_some());
    }

    #[test]
    fn finish_fails_when_any_step_errors() {
        let mut execution = WorkflowExecution::new("wf", json!({}));
        execution.start();
        execution.record_step("a", StepRecord::error("boom").with_status_code(Some(500)));
        execution.record_step("b", StepRecord::skipped(REASON_DEPENDENCY_FAILED));
        execution.finish();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.step_count_by_status(StepStatus::Skipped), 1);
    }

    #[test]
    fn fail_keeps_completed_steps() {
        let mut execution = WorkflowExecution::new("wf", json!({}));
        execution.record_step("a", StepRecord::success(json!(null)));
        execution.fail("planning failed");
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.status.is_terminal());
        assert_eq!(execution.step_results.len(), 1);
        assert_eq!(execution.error.as_deref(), Some("planning failed"));
    }
}
