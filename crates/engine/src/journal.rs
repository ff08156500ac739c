//! Per-execution log kept in memory for later inspection.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_types::{ExecutionStatus, StepRecord, StepStatus, WorkflowExecution, WorkflowStep};
use conduit_util::redact_sensitive;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::executor::ExecutionHooks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub level: JournalLevel,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Collects lifecycle events of every run it observes.
///
/// Register it with [`crate::WorkflowExecutor::with_hooks`]. Error messages are
/// redacted before they are stored.
///
/// An unbounded journal keeps every execution until [`ExecutionJournal::clear`]
/// is called. Long-lived executors should use
/// [`ExecutionJournal::with_max_executions`], which evicts the oldest execution
/// once the limit is reached.
#[derive(Debug, Default)]
pub struct ExecutionJournal {
    entries: Mutex<IndexMap<String, Vec<JournalEntry>>>,
    step_started: Mutex<HashMap<(String, String), Instant>>,
    max_executions: Option<usize>,
}

impl ExecutionJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `limit` executions (minimum one), oldest evicted first.
    pub fn with_max_executions(limit: usize) -> Self {
        Self {
            max_executions: Some(limit.max(1)),
            ..Self::default()
        }
    }

    /// Entries of one execution, oldest first.
    pub fn entries(&self, execution_id: &str) -> Vec<JournalEntry> {
        lock(&self.entries).get(execution_id).cloned().unwrap_or_default()
    }

    pub fn execution_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.entries).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drops everything recorded for `execution_id`.
    pub fn clear(&self, execution_id: &str) {
        lock(&self.entries).shift_remove(execution_id);
        lock(&self.step_started).retain(|(id, _), _| id != execution_id);
    }

    fn push(&self, execution_id: &str, step_id: Option<&str>, level: JournalLevel, message: String, duration_ms: Option<u64>) {
        let entry = JournalEntry {
            timestamp: Utc::now(),
            level,
            execution_id: execution_id.to_string(),
            step_id: step_id.map(str::to_string),
            message,
            duration_ms,
        };
        let evicted = {
            let mut entries = lock(&self.entries);
            let evicted = match self.max_executions {
                Some(limit) if !entries.contains_key(execution_id) && entries.len() >= limit => {
                    entries.shift_remove_index(0).map(|(id, _)| id)
                }
                _ => None,
            };
            entries.entry(execution_id.to_string()).or_default().push(entry);
            evicted
        };
        if let Some(evicted) = evicted {
            lock(&self.step_started).retain(|(id, _), _| *id != evicted);
        }
    }

    fn step_elapsed_ms(&self, execution_id: &str, step_id: &str) -> Option<u64> {
        lock(&self.step_started)
            .remove(&(execution_id.to_string(), step_id.to_string()))
            .map(|started| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn step_label(step: &WorkflowStep) -> &str {
    if step.name.trim().is_empty() { &step.id } else { &step.name }
}

#[async_trait]
impl ExecutionHooks for ExecutionJournal {
    async fn on_run_start(&self, execution: &WorkflowExecution) -> Result<()> {
        self.push(
            &execution.execution_id,
            None,
            JournalLevel::Info,
            format!("Workflow execution started for workflow {}", execution.workflow_id),
            None,
        );
        Ok(())
    }

    async fn on_step_start(&self, execution: &WorkflowExecution, step: &WorkflowStep) -> Result<()> {
        lock(&self.step_started).insert((execution.execution_id.clone(), step.id.clone()), Instant::now());
        self.push(
            &execution.execution_id,
            Some(&step.id),
            JournalLevel::Info,
            format!("Step '{}' started ({}:{})", step_label(step), step.service, step.action),
            None,
        );
        Ok(())
    }

    async fn on_step_complete(&self, execution: &WorkflowExecution, step: &WorkflowStep, record: &StepRecord) -> Result<()> {
        let duration_ms = self.step_elapsed_ms(&execution.execution_id, &step.id);
        let (level, message) = match record.status {
            StepStatus::Success => (JournalLevel::Info, format!("Step '{}' completed", step_label(step))),
            StepStatus::Skipped => (
                JournalLevel::Info,
                format!("Step '{}' skipped: {}", step_label(step), record.reason.as_deref().unwrap_or_default()),
            ),
            StepStatus::Error => (
                JournalLevel::Error,
                format!(
                    "Step '{}' failed: {}",
                    step_label(step),
                    redact_sensitive(record.error.as_deref().unwrap_or_default())
                ),
            ),
        };
        self.push(&execution.execution_id, Some(&step.id), level, message, duration_ms);
        Ok(())
    }

    async fn on_step_skipped(&self, execution: &WorkflowExecution, step: &WorkflowStep, record: &StepRecord) -> Result<()> {
        self.push(
            &execution.execution_id,
            Some(&step.id),
            JournalLevel::Warning,
            format!("Step '{}' skipped: {}", step_label(step), record.reason.as_deref().unwrap_or_default()),
            None,
        );
        Ok(())
    }

    async fn on_workflow_complete(&self, execution: &WorkflowExecution) -> Result<()> {
        let duration_ms = execution.duration_ms().and_then(|millis| u64::try_from(millis).ok());
        let (level, message) = match execution.status {
            ExecutionStatus::Completed => (JournalLevel::Info, "Workflow execution completed".to_string()),
            _ => (
                JournalLevel::Error,
                match execution.error.as_deref() {
                    Some(error) => format!("Workflow execution failed: {}", redact_sensitive(error)),
                    None => "Workflow execution failed".to_string(),
                },
            ),
        };
        self.push(&execution.execution_id, None, level, message, duration_ms);
        Ok(())
    }
}
