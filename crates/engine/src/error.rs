use thiserror::Error;

use crate::validation::InvalidWorkflow;

/// Failures of engine entry points that cannot produce an execution record.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },
    #[error(transparent)]
    InvalidWorkflow(#[from] InvalidWorkflow),
}
