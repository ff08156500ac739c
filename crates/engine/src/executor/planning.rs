//! Workflow step ordering and dependency planning.

use std::collections::{HashMap, HashSet, VecDeque};

use conduit_types::WorkflowStep;
use indexmap::IndexMap;
use thiserror::Error;

/// Reasons a step list cannot be ordered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("duplicate step identifier detected: '{step_id}'")]
    DuplicateStep { step_id: String },
    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    MissingDependency { step_id: String, dependency: String },
    #[error("cycle detected in workflow steps involving: {}", .steps.join(", "))]
    Cycle { steps: Vec<String> },
}

/// Build a topologically ordered step list for execution.
///
/// Uses Kahn's algorithm. Steps that become ready at the same time keep the
/// order in which they were declared, so identical definitions always produce
/// the same plan. Repeated entries in `depends_on` count once.
///
/// Returns an error for duplicate step identifiers and unknown dependencies
/// before ordering is attempted. A step that depends on itself is reported as
/// part of a cycle.
pub fn plan(steps: &[WorkflowStep]) -> Result<Vec<&WorkflowStep>, PlanError> {
    let mut lookup: IndexMap<&str, &WorkflowStep> = IndexMap::with_capacity(steps.len());
    for step in steps {
        if lookup.insert(step.id.as_str(), step).is_some() {
            return Err(PlanError::DuplicateStep { step_id: step.id.clone() });
        }
    }

    let mut in_degrees: HashMap<&str, usize> = lookup.keys().map(|step_id| (*step_id, 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for (step_id, step) in &lookup {
        let mut seen_dependencies = HashSet::new();
        for dependency in &step.depends_on {
            let Some((dependency, _)) = lookup.get_key_value(dependency.as_str()) else {
                return Err(PlanError::MissingDependency {
                    step_id: step_id.to_string(),
                    dependency: dependency.clone(),
                });
            };
            if !seen_dependencies.insert(*dependency) {
                continue;
            }
            if let Some(degree) = in_degrees.get_mut(step_id) {
                *degree += 1;
            }
            adjacency.entry(*dependency).or_default().push(*step_id);
        }
    }

    let mut queue: VecDeque<&str> = lookup
        .keys()
        .filter(|step_id| in_degrees.get(*step_id).copied().unwrap_or(0) == 0)
        .copied()
        .collect();

    let mut ordered = Vec::with_capacity(lookup.len());
    while let Some(step_id) = queue.pop_front() {
        ordered.push(step_id);

        if let Some(children) = adjacency.get(step_id) {
            for child in children {
                if let Some(degree) = in_degrees.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
    }

    if ordered.len() != lookup.len() {
        let mut remaining: Vec<String> = in_degrees
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(step_id, _)| step_id.to_string())
            .collect();
        remaining.sort();
        return Err(PlanError::Cycle { steps: remaining });
    }

    Ok(ordered.into_iter().filter_map(|step_id| lookup.get(step_id).copied()).collect())
}
