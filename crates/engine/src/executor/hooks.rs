//! Lifecycle notifications emitted while a run progresses.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use anyhow::Result;
use async_trait::async_trait;
use conduit_types::{StepRecord, WorkflowExecution, WorkflowStep};
use futures_util::FutureExt;
use tracing::warn;

use crate::connector::invoker::panic_message;

/// Observer of run progress.
///
/// Every method defaults to a no-op. Errors and panics raised by a hook are
/// logged and never change the outcome of the run.
#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    async fn on_run_start(&self, _execution: &WorkflowExecution) -> Result<()> {
        Ok(())
    }

    /// A step passed its dependency check and is about to be evaluated.
    async fn on_step_start(&self, _execution: &WorkflowExecution, _step: &WorkflowStep) -> Result<()> {
        Ok(())
    }

    /// A started step produced its record (success, error, or condition skip).
    async fn on_step_complete(&self, _execution: &WorkflowExecution, _step: &WorkflowStep, _record: &StepRecord) -> Result<()> {
        Ok(())
    }

    /// A step was skipped without starting because a dependency did not succeed.
    async fn on_step_skipped(&self, _execution: &WorkflowExecution, _step: &WorkflowStep, _record: &StepRecord) -> Result<()> {
        Ok(())
    }

    /// The run reached its terminal status.
    async fn on_workflow_complete(&self, _execution: &WorkflowExecution) -> Result<()> {
        Ok(())
    }
}

/// Awaits one hook call, swallowing its failure.
pub(crate) async fn notify<F>(hook: &'static str, execution_id: &str, call: F)
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(hook, execution_id, error = %error, "lifecycle hook failed"),
        Err(payload) => warn!(
            hook,
            execution_id,
            panic = %panic_message(payload.as_ref()),
            "lifecycle hook panicked"
        ),
    }
}
