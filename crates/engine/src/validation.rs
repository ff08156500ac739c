//! Definition-time validation of workflows.
//!
//! A workflow must pass these checks before it is stored or activated. Runs
//! themselves only depend on the planner, which repeats the dependency checks.

use std::collections::HashSet;

use conduit_types::Workflow;
use thiserror::Error;

use crate::executor::planning::{PlanError, plan};

/// A single problem found in a workflow definition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Workflow name is required")]
    MissingName,
    #[error("Workflow must have at least one step")]
    NoSteps,
    #[error("Step id is required")]
    MissingStepId,
    #[error("Duplicate step id '{step_id}'")]
    DuplicateStep { step_id: String },
    #[error("Step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },
    #[error("Workflow has circular dependencies involving: {}", .steps.join(", "))]
    CircularDependency { steps: Vec<String> },
}

/// Every validation problem of a rejected workflow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("workflow '{workflow_id}' is invalid: {}", .errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct InvalidWorkflow {
    pub workflow_id: String,
    pub errors: Vec<ValidationError>,
}

/// Lists every problem with a workflow definition. An empty list means the workflow is valid.
///
/// Unknown dependencies are reported individually. The cycle check only runs
/// when ids are unique and every dependency resolves, so a cycle is never
/// reported for a graph that could not be planned for another reason.
pub fn validate_workflow(workflow: &Workflow) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if workflow.name.trim().is_empty() {
        errors.push(ValidationError::MissingName);
    }
    if workflow.steps.is_empty() {
        errors.push(ValidationError::NoSteps);
    }

    let mut seen = HashSet::new();
    for step in &workflow.steps {
        if step.id.trim().is_empty() {
            errors.push(ValidationError::MissingStepId);
        } else if !seen.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStep { step_id: step.id.clone() });
        }
    }

    for step in &workflow.steps {
        for dependency in &step.depends_on {
            if !seen.contains(dependency.as_str()) {
                errors.push(ValidationError::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    if errors.iter().all(|error| matches!(error, ValidationError::MissingName | ValidationError::NoSteps))
        && let Err(PlanError::Cycle { steps }) = plan(&workflow.steps)
    {
        errors.push(ValidationError::CircularDependency { steps });
    }

    errors
}

/// Rejects a workflow that has any validation problem.
pub fn ensure_valid(workflow: &Workflow) -> Result<(), InvalidWorkflow> {
    let errors = validate_workflow(workflow);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(InvalidWorkflow {
            workflow_id: workflow.id.clone(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::WorkflowStep;

    fn base_workflow() -> Workflow {
        Workflow::new(
            "Sync",
            vec![
                WorkflowStep::new("fetch", "http", "get"),
                WorkflowStep::new("store", "sheets", "append").with_depends_on(["fetch"]),
            ],
        )
    }

    #[test]
    fn valid_workflow_has_no_errors() {
        assert!(validate_workflow(&base_workflow()).is_empty());
        assert!(ensure_valid(&base_workflow()).is_ok());
    }

    #[test]
    fn empty_name_and_steps_are_reported_together() {
        let workflow = Workflow::new("  ", vec![]);
        assert_eq!(
            validate_workflow(&workflow),
            vec![ValidationError::MissingName, ValidationError::NoSteps]
        );
    }

    #[test]
    fn unknown_dependency_is_reported_not_dropped() {
        let mut workflow = base_workflow();
        workflow.steps[1].depends_on.push("ghost".into());
        let errors = validate_workflow(&workflow);
        assert_eq!(
            errors,
            vec![ValidationError::UnknownDependency {
                step_id: "store".into(),
                dependency: "ghost".into()
            }]
        );
        assert_eq!(errors[0].to_string(), "Step 'store' depends on unknown step 'ghost'");
    }

    #[test]
    fn cycles_are_reported() {
        let mut workflow = base_workflow();
        workflow.steps[0].depends_on.push("store".into());
        let errors = validate_workflow(&workflow);
        assert!(matches!(errors.as_slice(), [ValidationError::CircularDependency { .. }]));
        assert!(errors[0].to_string().contains("circular dependencies"));
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let mut workflow = base_workflow();
        workflow.steps.push(WorkflowStep::new("fetch", "http", "get"));
        let error = ensure_valid(&workflow).expect_err("should be invalid");
        assert_eq!(error.errors, vec![ValidationError::DuplicateStep { step_id: "fetch".into() }]);
        assert!(error.to_string().contains("Duplicate step id 'fetch'"));
    }
}
