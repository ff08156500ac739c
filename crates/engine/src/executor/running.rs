//! Registry of in-flight executions.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use conduit_types::WorkflowExecution;
use indexmap::IndexMap;

/// Snapshots of runs that have started and not yet finished, in start order.
///
/// Shared by every run of an executor; the mutex is only held for map updates.
#[derive(Debug, Clone, Default)]
pub struct RunningExecutions {
    inner: Arc<Mutex<IndexMap<String, WorkflowExecution>>>,
}

impl RunningExecutions {
    /// Registers a run. The entry is removed when the returned guard drops.
    pub fn register(&self, execution: &WorkflowExecution) -> RunGuard {
        self.lock().insert(execution.execution_id.clone(), execution.clone());
        RunGuard {
            registry: self.clone(),
            execution_id: execution.execution_id.clone(),
        }
    }

    /// Replaces the snapshot of a registered run.
    pub fn update(&self, execution: &WorkflowExecution) {
        if let Some(entry) = self.lock().get_mut(&execution.execution_id) {
            *entry = execution.clone();
        }
    }

    pub fn get(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.lock().get(execution_id).cloned()
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.lock().contains_key(execution_id)
    }

    pub fn snapshot(&self) -> Vec<WorkflowExecution> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove(&self, execution_id: &str) {
        self.lock().shift_remove(execution_id);
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, WorkflowExecution>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its run from the registry on drop.
#[derive(Debug)]
pub struct RunGuard {
    registry: RunningExecutions,
    execution_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.execution_id);
    }
}
