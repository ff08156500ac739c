//! Step condition evaluation.
//!
//! Conditions are a single comparison or a bare truthiness check:
//!
//! | form                | semantics                                      |
//! |---------------------|------------------------------------------------|
//! | `a == b`, `a != b`  | string equality                                |
//! | `a >= b` ... `a < b`| numeric comparison                             |
//! | `a in b`            | the text of `a` occurs in `b`                  |
//! | `a not in b`        | the text of `a` does not occur in `b`          |
//! | `true`, `1`         | literal true                                   |
//! | `false`, `0`        | literal false                                  |
//! | `path`              | truthiness of the value at `path`              |
//!
//! Operators are tried in the table order and the expression is split on the
//! first occurrence of the first operator found. The left side is a scope path;
//! the right side is literal text with surrounding quotes removed.
//!
//! Evaluation failures never abort a run. They are logged and resolved by the
//! configured [`ConditionPolicy`], which defaults to running the step.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::resolve::{format_json_value, lookup_path};

/// Scope roots addressable from a condition operand.
const SCOPE_ROOTS: [&str; 3] = ["trigger", "steps", "variables"];

/// Outcome applied when a condition cannot be evaluated.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionPolicy {
    /// Run the step.
    #[default]
    FailOpen,
    /// Skip the step.
    FailClosed,
}

impl ConditionPolicy {
    pub fn outcome_on_failure(self) -> bool {
        matches!(self, ConditionPolicy::FailOpen)
    }
}

/// Reasons a condition could not be evaluated.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConditionError {
    #[error("condition expression is empty")]
    Empty,
    #[error("operator '{operator}' is missing its left operand")]
    MissingOperand { operator: &'static str },
    #[error("operand '{operand}' is not numeric for operator '{operator}'")]
    NotNumeric { operator: &'static str, operand: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Equal,
    NotEqual,
    GreaterOrEqual,
    LessOrEqual,
    Greater,
    Less,
    NotIn,
    In,
}

impl Operator {
    /// `not in` is probed before `in` because its token contains ` in `.
    const PRECEDENCE: [Operator; 8] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::GreaterOrEqual,
        Operator::LessOrEqual,
        Operator::Greater,
        Operator::Less,
        Operator::NotIn,
        Operator::In,
    ];

    fn token(self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::Less => "<",
            Operator::NotIn => " not in ",
            Operator::In => " in ",
        }
    }

    fn symbol(self) -> &'static str {
        self.token().trim()
    }

    fn apply(self, left: &Value, right: &str) -> Result<bool, ConditionError> {
        let left_text = format_json_value(left);
        match self {
            Operator::Equal => Ok(left_text == right),
            Operator::NotEqual => Ok(left_text != right),
            Operator::In => Ok(right.contains(left_text.as_str())),
            Operator::NotIn => Ok(!right.contains(left_text.as_str())),
            Operator::GreaterOrEqual | Operator::LessOrEqual | Operator::Greater | Operator::Less => {
                let left_number = numeric_operand(self, left)?;
                let right_number = numeric_operand(self, &Value::String(right.to_string()))?;
                Ok(match self {
                    Operator::GreaterOrEqual => left_number >= right_number,
                    Operator::LessOrEqual => left_number <= right_number,
                    Operator::Greater => left_number > right_number,
                    _ => left_number < right_number,
                })
            }
        }
    }
}

/// Evaluates step conditions under a fixed failure policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator {
    policy: ConditionPolicy,
}

impl ConditionEvaluator {
    pub fn new(policy: ConditionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConditionPolicy {
        self.policy
    }

    /// Evaluates `expression` against `scope`. Never fails.
    pub fn evaluate(&self, expression: &str, scope: &Value) -> bool {
        match try_evaluate(expression, scope) {
            Ok(outcome) => outcome,
            Err(error) => {
                let outcome = self.policy.outcome_on_failure();
                warn!(expression, %error, outcome, "failed to evaluate condition; applying policy");
                outcome
            }
        }
    }
}

/// Evaluates a condition with the default fail-open policy.
pub fn evaluate_condition(expression: &str, scope: &Value) -> bool {
    ConditionEvaluator::default().evaluate(expression, scope)
}

/// Evaluates a condition, surfacing failures instead of applying a policy.
pub fn try_evaluate(expression: &str, scope: &Value) -> Result<bool, ConditionError> {
    let expression = strip_template_wrapper(expression);
    if expression.is_empty() {
        return Err(ConditionError::Empty);
    }

    for operator in Operator::PRECEDENCE {
        if let Some((left, right)) = expression.split_once(operator.token()) {
            let left = strip_template_wrapper(left);
            if left.is_empty() {
                return Err(ConditionError::MissingOperand {
                    operator: operator.symbol(),
                });
            }
            let left_value = lookup_operand(scope, left);
            return operator.apply(&left_value, strip_quotes(right));
        }
    }

    match expression.to_ascii_lowercase().as_str() {
        "true" | "1" => return Ok(true),
        "false" | "0" => return Ok(false),
        _ => {}
    }

    Ok(is_truthy(&lookup_operand(scope, expression)))
}

/// Resolves an operand path, returning the empty string when it is missing.
///
/// Paths that do not start at a scope root are looked up under `variables`
/// and then under `trigger.data`, so `status == active` reads a run variable
/// or trigger field named `status`.
fn lookup_operand(scope: &Value, path: &str) -> Value {
    if let Some(value) = lookup_path(scope, path) {
        return value.clone();
    }
    let root = path.split('.').next().unwrap_or_default().trim();
    if !SCOPE_ROOTS.contains(&root) {
        for prefix in ["variables", "trigger.data"] {
            if let Some(value) = lookup_path(scope, &format!("{prefix}.{path}")) {
                return value.clone();
            }
        }
    }
    Value::String(String::new())
}

fn numeric_operand(operator: Operator, value: &Value) -> Result<f64, ConditionError> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ConditionError::NotNumeric {
        operator: operator.symbol(),
        operand: format_json_value(value),
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn strip_template_wrapper(expression: &str) -> &str {
    let trimmed = expression.trim();
    trimmed
        .strip_prefix("{{")
        .and_then(|inner| inner.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn strip_quotes(operand: &str) -> &str {
    operand.trim().trim_matches(|c| c == '\'' || c == '"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Value {
        json!({
            "trigger": {"data": {"status": "active", "amount": "42.5", "priority": 3, "labels": []}},
            "steps": {"lookup": {"status": "success", "output": {"plan": "pro", "seats": 10}}},
            "variables": {"mode": "live"}
        })
    }

    #[test]
    fn equality_compares_strings() {
        let scope = scope();
        assert!(evaluate_condition("status == active", &scope));
        assert!(!evaluate_condition("status == paused", &scope));
        assert!(evaluate_condition("trigger.data.status == 'active'", &scope));
        assert!(evaluate_condition("steps.lookup.output.plan != \"free\"", &scope));
        assert!(evaluate_condition("mode == live", &scope));
    }

    #[test]
    fn ordering_operators_coerce_numbers() {
        let scope = scope();
        assert!(evaluate_condition("trigger.data.amount > 40", &scope));
        assert!(evaluate_condition("trigger.data.priority >= 3", &scope));
        assert!(evaluate_condition("steps.lookup.output.seats <= 10", &scope));
        assert!(!evaluate_condition("steps.lookup.output.seats < 10", &scope));
    }

    #[test]
    fn membership_checks_substrings() {
        let scope = scope();
        assert!(evaluate_condition("trigger.data.status in 'active,pending'", &scope));
        assert!(!evaluate_condition("trigger.data.status in 'closed,archived'", &scope));
        assert!(evaluate_condition("trigger.data.status not in 'closed,archived'", &scope));
        assert!(!evaluate_condition("trigger.data.status not in 'active'", &scope));
    }

    #[test]
    fn literals_and_truthiness() {
        let scope = scope();
        assert!(evaluate_condition("TRUE", &scope));
        assert!(evaluate_condition("1", &scope));
        assert!(!evaluate_condition("False", &scope));
        assert!(!evaluate_condition("0", &scope));
        assert!(evaluate_condition("steps.lookup.output.plan", &scope));
        assert!(!evaluate_condition("trigger.data.labels", &scope));
        assert!(!evaluate_condition("trigger.data.nothing", &scope));
    }

    #[test]
    fn template_wrapped_conditions_are_accepted() {
        assert!(evaluate_condition("{{ trigger.data.priority >= 2 }}", &scope()));
        assert!(evaluate_condition("{{trigger.data.status}} == active", &scope()));
    }

    #[test]
    fn unparsable_condition_fails_open_by_default() {
        let scope = scope();
        assert_eq!(
            try_evaluate("trigger.data.status > 5", &scope),
            Err(ConditionError::NotNumeric {
                operator: ">",
                operand: "active".into()
            })
        );
        assert!(evaluate_condition("trigger.data.status > 5", &scope));
        assert!(evaluate_condition("   ", &scope));
        assert!(evaluate_condition("== x", &scope));
    }

    #[test]
    fn fail_closed_policy_skips_on_failure() {
        let evaluator = ConditionEvaluator::new(ConditionPolicy::FailClosed);
        assert!(!evaluator.evaluate("trigger.data.missing < 3", &scope()));
        assert!(evaluator.evaluate("trigger.data.priority < 4", &scope()));
    }
}
