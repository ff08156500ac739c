//! In-memory store of validated workflow definitions.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use conduit_types::Workflow;
use indexmap::IndexMap;
use tracing::info;

use crate::error::EngineError;
use crate::validation::{InvalidWorkflow, ensure_valid};

/// Workflows keyed by id, in insertion order.
///
/// Only definitions that pass validation are stored, so every workflow
/// returned from here can be planned.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<IndexMap<String, Workflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `workflow`, replacing any definition with the same id.
    pub fn insert(&self, mut workflow: Workflow) -> Result<(), InvalidWorkflow> {
        ensure_valid(&workflow)?;
        let mut workflows = self.write();
        if workflows.contains_key(&workflow.id) {
            workflow.updated_at = Utc::now();
        }
        info!(workflow_id = %workflow.id, name = %workflow.name, "stored workflow");
        workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    pub fn get(&self, workflow_id: &str) -> Option<Workflow> {
        self.read().get(workflow_id).cloned()
    }

    pub fn remove(&self, workflow_id: &str) -> Option<Workflow> {
        self.write().shift_remove(workflow_id)
    }

    pub fn activate(&self, workflow_id: &str) -> Result<(), EngineError> {
        self.update(workflow_id, Workflow::activate)
    }

    pub fn deactivate(&self, workflow_id: &str) -> Result<(), EngineError> {
        self.update(workflow_id, Workflow::deactivate)
    }

    pub fn list(&self) -> Vec<Workflow> {
        self.read().values().cloned().collect()
    }

    /// Active workflows whose webhook trigger listens for `event` from `service`.
    pub fn find_by_webhook(&self, service: &str, event: &str) -> Vec<Workflow> {
        self.read()
            .values()
            .filter(|workflow| workflow.is_active())
            .filter(|workflow| {
                workflow
                    .trigger
                    .as_ref()
                    .is_some_and(|trigger| trigger.matches_webhook(service, event))
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn update(&self, workflow_id: &str, apply: impl FnOnce(&mut Workflow)) -> Result<(), EngineError> {
        let mut workflows = self.write();
        let workflow = workflows.get_mut(workflow_id).ok_or_else(|| EngineError::WorkflowNotFound {
            workflow_id: workflow_id.to_string(),
        })?;
        apply(workflow);
        info!(workflow_id, status = ?workflow.status, "workflow status changed");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Workflow>> {
        self.workflows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Workflow>> {
        self.workflows.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationError;
    use conduit_types::{Trigger, TriggerType, WorkflowStatus, WorkflowStep};

    fn webhook_workflow(name: &str, event: &str) -> Workflow {
        let mut workflow = Workflow::new(name, vec![WorkflowStep::new("notify", "slack", "post_message")]);
        workflow.trigger = Some(Trigger {
            trigger_type: TriggerType::Webhook,
            service: Some("github".into()),
            event: Some(event.into()),
            ..Default::default()
        });
        workflow
    }

    #[test]
    fn rejects_invalid_definitions() {
        let registry = WorkflowRegistry::new();
        let workflow = Workflow::new("", Vec::new());

        let error = registry.insert(workflow).expect_err("invalid workflow");
        assert_eq!(error.errors, vec![ValidationError::MissingName, ValidationError::NoSteps]);
        assert!(registry.is_empty());
    }

    #[test]
    fn status_changes_apply_to_stored_workflow() {
        let registry = WorkflowRegistry::new();
        let workflow = webhook_workflow("triage", "issue.opened");
        let workflow_id = workflow.id.clone();
        registry.insert(workflow).expect("valid");

        registry.activate(&workflow_id).expect("known id");
        assert_eq!(registry.get(&workflow_id).map(|w| w.status), Some(WorkflowStatus::Active));
        registry.deactivate(&workflow_id).expect("known id");
        assert_eq!(registry.get(&workflow_id).map(|w| w.status), Some(WorkflowStatus::Paused));

        assert!(matches!(
            registry.activate("missing"),
            Err(EngineError::WorkflowNotFound { .. })
        ));
        assert!(registry.remove(&workflow_id).is_some());
        assert!(registry.get(&workflow_id).is_none());
    }

    #[test]
    fn webhook_lookup_only_returns_active_matches() {
        let registry = WorkflowRegistry::new();
        let active = webhook_workflow("active", "issue.opened");
        let paused = webhook_workflow("paused", "issue.opened");
        let other = webhook_workflow("other", "push");
        let (active_id, other_id) = (active.id.clone(), other.id.clone());
        for workflow in [active, paused, other] {
            registry.insert(workflow).expect("valid");
        }
        registry.activate(&active_id).expect("known");
        registry.activate(&other_id).expect("known");

        let matches: Vec<String> = registry
            .find_by_webhook("github", "issue.opened")
            .into_iter()
            .map(|workflow| workflow.name)
            .collect();
        assert_eq!(matches, vec!["active"]);
        assert_eq!(registry.list().len(), 3);
    }
}
