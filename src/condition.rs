//! Typed comparisons against resolved fields.

use serde_json::Value;

use crate::execution::WorkflowExecution;
use crate::resolver::{resolve_value, value_to_string, LoopScope};
use crate::types::{ConditionOperator, WorkflowCondition};

/// Evaluate a single condition against the current run state. Conditions are
/// total: an unresolvable field or malformed comparison yields `false`, never
/// an error.
pub fn evaluate_condition(
    condition: &WorkflowCondition,
    execution: &WorkflowExecution,
    scope: Option<&LoopScope>,
) -> bool {
    let actual = resolve_value(&condition.field, execution, scope);
    let expected = condition.value.as_ref();

    match condition.operator {
        ConditionOperator::Equals => actual.as_ref() == expected,
        ConditionOperator::NotEquals => actual.as_ref() != expected,
        ConditionOperator::Contains => match (&actual, expected) {
            (Some(actual), Some(expected)) => {
                value_to_string(actual).contains(&value_to_string(expected))
            }
            _ => false,
        },
        ConditionOperator::GreaterThan => match (numeric(actual.as_ref()), numeric(expected)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        ConditionOperator::LessThan => match (numeric(actual.as_ref()), numeric(expected)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        ConditionOperator::IsEmpty => is_empty(actual.as_ref()),
        ConditionOperator::IsNotEmpty => !is_empty(actual.as_ref()),
        ConditionOperator::RegexMatch => match (&actual, expected) {
            (Some(actual), Some(pattern)) => regex::Regex::new(&value_to_string(pattern))
                .map(|re| re.is_match(&value_to_string(actual)))
                .unwrap_or(false),
            _ => false,
        },
    }
}

/// Emptiness is structural: unresolvable, null, `""`, and `[]` are empty;
/// `0` and `false` are not.
fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn numeric(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecuteWorkflowRequest, WorkflowExecution};
    use crate::types::WorkflowDefinition;
    use serde_json::json;

    fn execution(inputs: Value) -> WorkflowExecution {
        let workflow: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf", "name": "wf",
            "steps": [{"id": "s", "name": "s", "action": {"type": "delay"}}],
            "startStepId": "s"
        }))
        .unwrap();
        let request = ExecuteWorkflowRequest {
            workflow_id: "wf".to_string(),
            inputs: serde_json::from_value(inputs).unwrap(),
            ..Default::default()
        };
        WorkflowExecution::new(&workflow, &request)
    }

    fn cond(field: &str, operator: &str, value: Option<Value>) -> WorkflowCondition {
        serde_json::from_value(json!({
            "field": field,
            "operator": operator,
            "value": value
        }))
        .unwrap()
    }

    #[test]
    fn equals_is_strict() {
        let exec = execution(json!({"n": 5, "s": "5"}));
        assert!(evaluate_condition(&cond("inputs.n", "equals", Some(json!(5))), &exec, None));
        assert!(!evaluate_condition(&cond("inputs.n", "equals", Some(json!("5"))), &exec, None));
        assert!(evaluate_condition(&cond("inputs.s", "not_equals", Some(json!(5))), &exec, None));
    }

    #[test]
    fn contains_stringifies_both_sides() {
        let exec = execution(json!({"msg": "hello world", "n": 1234}));
        assert!(evaluate_condition(
            &cond("inputs.msg", "contains", Some(json!("lo wo"))),
            &exec,
            None
        ));
        assert!(evaluate_condition(
            &cond("inputs.n", "contains", Some(json!(23))),
            &exec,
            None
        ));
        assert!(!evaluate_condition(
            &cond("inputs.msg", "contains", Some(json!("absent"))),
            &exec,
            None
        ));
    }

    #[test]
    fn numeric_comparisons() {
        let exec = execution(json!({"n": 10, "s": "10", "text": "abc"}));
        assert!(evaluate_condition(&cond("inputs.n", "greater_than", Some(json!(3))), &exec, None));
        assert!(evaluate_condition(&cond("inputs.n", "less_than", Some(json!(11))), &exec, None));
        assert!(evaluate_condition(&cond("inputs.s", "greater_than", Some(json!(9))), &exec, None));
        assert!(!evaluate_condition(
            &cond("inputs.text", "greater_than", Some(json!(1))),
            &exec,
            None
        ));
    }

    #[test]
    fn is_empty_boundary() {
        // Empty: missing, empty array, empty string. Not empty: 0 and false.
        let exec = execution(json!({
            "arr": [], "s": "", "zero": 0, "flag": false, "full": [1]
        }));
        assert!(evaluate_condition(&cond("inputs.missing", "is_empty", None), &exec, None));
        assert!(evaluate_condition(&cond("inputs.arr", "is_empty", None), &exec, None));
        assert!(evaluate_condition(&cond("inputs.s", "is_empty", None), &exec, None));
        assert!(!evaluate_condition(&cond("inputs.zero", "is_empty", None), &exec, None));
        assert!(!evaluate_condition(&cond("inputs.flag", "is_empty", None), &exec, None));
        assert!(evaluate_condition(&cond("inputs.full", "is_not_empty", None), &exec, None));
        assert!(!evaluate_condition(&cond("inputs.missing", "is_not_empty", None), &exec, None));
    }

    #[test]
    fn regex_match() {
        let exec = execution(json!({"email": "a@b.co"}));
        assert!(evaluate_condition(
            &cond("inputs.email", "regex_match", Some(json!("^[^@]+@[^@]+$"))),
            &exec,
            None
        ));
        // Invalid pattern evaluates false instead of erroring.
        assert!(!evaluate_condition(
            &cond("inputs.email", "regex_match", Some(json!("("))),
            &exec,
            None
        ));
    }
}
