//! Workflow execution: plans a workflow, then runs its steps one at a time.
//!
//! For each step in plan order the executor
//!
//! 1. skips it when a dependency did not succeed,
//! 2. evaluates its condition against the current scope,
//! 3. resolves `{{ ... }}` templates in its inputs,
//! 4. dispatches the action through the [`ConnectorInvoker`],
//!
//! and records the result in the run context so later steps can reference it.
//! A failing step never aborts the run; its dependents are skipped and the run
//! ends `failed`.

pub mod hooks;
pub mod planning;
pub mod running;

use std::sync::Arc;

use conduit_types::{
    CredentialMap, REASON_CONDITION_NOT_MET, REASON_DEPENDENCY_FAILED, StepRecord, StepStatus, Workflow, WorkflowExecution,
    WorkflowStep,
};
use serde_json::{Map, Value};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::condition::{ConditionEvaluator, ConditionPolicy};
use crate::connector::ConnectorInvoker;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::registry::WorkflowRegistry;
use crate::resolve::resolve_inputs;
use hooks::notify;

pub use hooks::ExecutionHooks;
pub use planning::{PlanError, plan};
pub use running::{RunGuard, RunningExecutions};

/// Inputs of a single run besides the workflow itself.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub trigger_data: Value,
    /// Per-service credentials that replace the globally configured entry.
    pub credentials: CredentialMap,
    /// Values exposed to templates under `variables`.
    pub variables: Map<String, Value>,
}

impl RunRequest {
    pub fn new(trigger_data: Value) -> Self {
        Self {
            trigger_data,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialMap) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }
}

/// Runs workflows against a shared connector invoker.
///
/// One executor may drive many runs concurrently; each run owns its own
/// context and only the in-flight registry is shared.
pub struct WorkflowExecutor {
    invoker: Arc<ConnectorInvoker>,
    conditions: ConditionEvaluator,
    hooks: Vec<Arc<dyn ExecutionHooks>>,
    running: RunningExecutions,
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("invoker", &self.invoker)
            .field("conditions", &self.conditions)
            .field("hooks", &self.hooks.len())
            .field("running", &self.running.len())
            .finish()
    }
}

impl WorkflowExecutor {
    pub fn new(invoker: ConnectorInvoker) -> Self {
        Self {
            invoker: Arc::new(invoker),
            conditions: ConditionEvaluator::default(),
            hooks: Vec::new(),
            running: RunningExecutions::default(),
        }
    }

    pub fn with_condition_policy(mut self, policy: ConditionPolicy) -> Self {
        self.conditions = ConditionEvaluator::new(policy);
        self
    }

    /// Adds a lifecycle observer. Hooks are notified in registration order.
    pub fn with_hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn invoker(&self) -> &ConnectorInvoker {
        &self.invoker
    }

    /// Snapshots of runs currently in progress, oldest first.
    pub fn running_executions(&self) -> Vec<WorkflowExecution> {
        self.running.snapshot()
    }

    pub fn is_running(&self, execution_id: &str) -> bool {
        self.running.contains(execution_id)
    }

    /// Shared handle to the in-flight registry, e.g. for hooks that report progress.
    pub fn running_registry(&self) -> RunningExecutions {
        self.running.clone()
    }

    /// Runs `workflow` with the given trigger payload and run credentials.
    pub async fn execute(&self, workflow: &Workflow, trigger_data: Value, credentials: CredentialMap) -> WorkflowExecution {
        self.execute_with(workflow, RunRequest::new(trigger_data).with_credentials(credentials))
            .await
    }

    /// Runs the stored workflow `workflow_id`.
    pub async fn execute_by_id(
        &self,
        registry: &WorkflowRegistry,
        workflow_id: &str,
        request: RunRequest,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = registry.get(workflow_id).ok_or_else(|| EngineError::WorkflowNotFound {
            workflow_id: workflow_id.to_string(),
        })?;
        Ok(self.execute_with(&workflow, request).await)
    }

    /// Runs `workflow` to completion and returns the terminal execution record.
    ///
    /// Never fails: planning errors mark the run failed with a top-level error
    /// and step failures are captured in their step records.
    pub async fn execute_with(&self, workflow: &Workflow, request: RunRequest) -> WorkflowExecution {
        let mut execution = WorkflowExecution::new(&workflow.id, request.trigger_data.clone());
        let span = info_span!(
            "workflow_run",
            execution_id = %execution.execution_id,
            workflow_id = %workflow.id
        );

        async move {
            execution.start();
            let guard = self.running.register(&execution);
            info!(workflow = %workflow.name, steps = workflow.steps.len(), "workflow execution started");
            for hooks in &self.hooks {
                notify("on_run_start", &execution.execution_id, hooks.on_run_start(&execution)).await;
            }

            let mut context = ExecutionContext::new(&execution.execution_id, &workflow.id, request.trigger_data)
                .with_variables(request.variables)
                .with_credentials(request.credentials);

            match plan(&workflow.steps) {
                Ok(ordered) => {
                    for step in ordered {
                        self.run_step(step, &mut context, &mut execution).await;
                        self.running.update(&execution);
                    }
                    execution.context = context.scope();
                    execution.finish();
                }
                Err(plan_error) => {
                    error!(error = %plan_error, "workflow planning failed");
                    execution.context = context.scope();
                    execution.fail(plan_error.to_string());
                }
            }

            info!(
                status = ?execution.status,
                succeeded = execution.step_count_by_status(StepStatus::Success),
                failed = execution.step_count_by_status(StepStatus::Error),
                skipped = execution.step_count_by_status(StepStatus::Skipped),
                duration_ms = execution.duration_ms().unwrap_or_default(),
                "workflow execution finished"
            );
            // Completion hooks observe the run as no longer in flight.
            drop(guard);
            for hooks in &self.hooks {
                notify("on_workflow_complete", &execution.execution_id, hooks.on_workflow_complete(&execution)).await;
            }
            execution
        }
        .instrument(span)
        .await
    }

    /// Runs one step outside of any workflow run, e.g. to test its configuration.
    ///
    /// `test_data` plays the role of the trigger payload; no other step results
    /// are visible. The condition is honored, dependencies are ignored, and the
    /// run is neither registered nor reported to hooks.
    pub async fn execute_step_isolated(
        &self,
        workflow: &Workflow,
        step_id: &str,
        test_data: Value,
        credentials: CredentialMap,
    ) -> StepRecord {
        let Some(step) = workflow.get_step(step_id) else {
            return StepRecord::error(format!("Step not found: {step_id}"));
        };
        let execution_id = format!("test-{}", uuid::Uuid::new_v4());
        let context = ExecutionContext::new(execution_id, &workflow.id, test_data).with_credentials(credentials);
        let span = info_span!("step_test", execution_id = %context.execution_id, workflow_id = %workflow.id);
        self.evaluate_step(step, &context).instrument(span).await
    }

    async fn run_step(&self, step: &WorkflowStep, context: &mut ExecutionContext, execution: &mut WorkflowExecution) {
        let blocked_by = step
            .depends_on
            .iter()
            .find(|dependency| !context.step_status(dependency).is_some_and(StepStatus::satisfies_dependents));
        if let Some(dependency) = blocked_by {
            debug!(step_id = %step.id, dependency = %dependency, "skipping step: dependency did not succeed");
            let record = StepRecord::skipped(REASON_DEPENDENCY_FAILED);
            context.record(&step.id, record.clone());
            execution.record_step(&step.id, record.clone());
            for hooks in &self.hooks {
                notify("on_step_skipped", &execution.execution_id, hooks.on_step_skipped(execution, step, &record)).await;
            }
            return;
        }

        debug!(step_id = %step.id, service = %step.service, action = %step.action, "step started");
        for hooks in &self.hooks {
            notify("on_step_start", &execution.execution_id, hooks.on_step_start(execution, step)).await;
        }

        let record = self.evaluate_step(step, context).await;
        match record.status {
            StepStatus::Success => info!(step_id = %step.id, "step succeeded"),
            StepStatus::Skipped => info!(step_id = %step.id, reason = record.reason.as_deref().unwrap_or_default(), "step skipped"),
            StepStatus::Error => warn!(
                step_id = %step.id,
                status_code = ?record.status_code,
                error = %conduit_util::redact_sensitive(record.error.as_deref().unwrap_or_default()),
                "step failed"
            ),
        }

        context.record(&step.id, record.clone());
        execution.record_step(&step.id, record.clone());
        for hooks in &self.hooks {
            notify("on_step_complete", &execution.execution_id, hooks.on_step_complete(execution, step, &record)).await;
        }
    }

    /// Condition, template resolution and dispatch for one step.
    async fn evaluate_step(&self, step: &WorkflowStep, context: &ExecutionContext) -> StepRecord {
        let scope = context.scope();
        if let Some(condition) = step.condition.as_deref().filter(|condition| !condition.trim().is_empty())
            && !self.conditions.evaluate(condition, &scope)
        {
            debug!(step_id = %step.id, condition, "condition evaluated false");
            return StepRecord::skipped(REASON_CONDITION_NOT_MET);
        }

        let inputs = resolve_inputs(&step.inputs, &scope);
        self.invoker.invoke_step(step, &inputs, context).await
    }
}
