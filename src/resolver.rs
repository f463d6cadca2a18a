//! Dot-path value resolution across run inputs, prior step results, and the
//! execution context.
//!
//! Grammar: `inputs.<seg>...`, `context.<seg>...`, or `<stepId>.<seg>...`.
//! Segments are dot-separated with no key escaping. Resolution never fails:
//! a missing or null intermediate short-circuits to `None`.

use serde_json::{json, Value};

use crate::execution::WorkflowExecution;
use crate::types::Transform;

/// Immutable per-iteration overlay visible under the `inputs.` namespace.
///
/// Loop iterations do not mutate `execution.inputs`; instead the scope is
/// passed down the call chain and consulted before the base inputs.
#[derive(Debug, Clone, Default)]
pub struct LoopScope {
    pub item: Option<Value>,
    pub index: Option<u64>,
}

impl LoopScope {
    pub fn for_item(item: Value, index: u64) -> Self {
        Self {
            item: Some(item),
            index: Some(index),
        }
    }

    pub fn for_index(index: u64) -> Self {
        Self {
            item: None,
            index: Some(index),
        }
    }

    fn get(&self, key: &str) -> Option<Value> {
        match key {
            "_loopItem" => self.item.clone(),
            "_loopIndex" => self.index.map(|i| json!(i)),
            _ => None,
        }
    }
}

/// Resolve a dot-path against the run state.
pub fn resolve_value(
    path: &str,
    execution: &WorkflowExecution,
    scope: Option<&LoopScope>,
) -> Option<Value> {
    let mut segments = path.split('.');
    let root = segments.next()?;
    let rest: Vec<&str> = segments.collect();

    match root {
        "inputs" => lookup_inputs(&rest, execution, scope),
        "context" => {
            if rest.is_empty() {
                return Some(json!(execution.context));
            }
            let ctx = execution.context.get(rest[0])?;
            dig(ctx, &rest[1..])
        }
        step_id => {
            if let Some(result) = execution.step_results.get(step_id) {
                // Navigate inside the recorded step result, e.g.
                // `step1.result.count`.
                let as_value = serde_json::to_value(result).ok()?;
                return dig(&as_value, &rest);
            }
            // No such step result: the whole path falls back to an inputs
            // lookup.
            let all: Vec<&str> = path.split('.').collect();
            lookup_inputs(&all, execution, scope)
        }
    }
}

fn lookup_inputs(
    segments: &[&str],
    execution: &WorkflowExecution,
    scope: Option<&LoopScope>,
) -> Option<Value> {
    if segments.is_empty() {
        let mut merged = json!(execution.inputs);
        if let (Some(scope), Some(map)) = (scope, merged.as_object_mut()) {
            if let Some(item) = &scope.item {
                map.insert("_loopItem".to_string(), item.clone());
            }
            if let Some(index) = scope.index {
                map.insert("_loopIndex".to_string(), json!(index));
            }
        }
        return Some(merged);
    }

    let head = segments[0];
    if let Some(value) = scope.and_then(|s| s.get(head)) {
        return dig(&value, &segments[1..]);
    }
    let value = execution.inputs.get(head)?;
    dig(value, &segments[1..])
}

/// Nested lookup into a JSON value. Objects are indexed by key, arrays by
/// numeric segment; anything else ends the walk.
fn dig(value: &Value, segments: &[&str]) -> Option<Value> {
    let mut current = value;
    for segment in segments {
        match current {
            Value::Object(map) => current = map.get(*segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
        if current.is_null() {
            return None;
        }
    }
    if current.is_null() {
        None
    } else {
        Some(current.clone())
    }
}

/// Post-process a resolved mapping value.
pub fn apply_transform(transform: Transform, value: Value) -> Value {
    match transform {
        Transform::First => match value {
            Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
            other => other,
        },
        Transform::Last => match value {
            Value::Array(items) => items.into_iter().next_back().unwrap_or(Value::Null),
            other => other,
        },
        Transform::Count => match &value {
            Value::Array(items) => json!(items.len()),
            Value::String(s) => json!(s.chars().count()),
            Value::Null => json!(0),
            _ => json!(1),
        },
        Transform::Sum => match &value {
            Value::Array(items) => {
                let total: f64 = items.iter().filter_map(Value::as_f64).sum();
                json!(total)
            }
            other => json!(other.as_f64().unwrap_or(0.0)),
        },
        Transform::Join => match &value {
            Value::Array(items) => {
                let joined = items
                    .iter()
                    .map(value_to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                Value::String(joined)
            }
            other => Value::String(value_to_string(other)),
        },
        Transform::Json => {
            Value::String(serde_json::to_string(&value).unwrap_or_default())
        }
    }
}

/// Display form used by `contains`, `regex_match`, and `join`: strings stay
/// unquoted, everything else serializes.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{StepExecutionResult, StepStatus};
    use crate::types::WorkflowDefinition;
    use chrono::Utc;
    use serde_json::json;

    fn execution_with_inputs(inputs: Value) -> WorkflowExecution {
        let workflow: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf-1",
            "name": "test",
            "steps": [{"id": "s1", "name": "s1", "action": {"type": "delay"}}],
            "startStepId": "s1"
        }))
        .unwrap();
        let request = crate::execution::ExecuteWorkflowRequest {
            workflow_id: "wf-1".to_string(),
            inputs: serde_json::from_value(inputs).unwrap(),
            context: [("agentId".to_string(), json!("ag-1"))].into_iter().collect(),
            async_mode: false,
        };
        WorkflowExecution::new(&workflow, &request)
    }

    #[test]
    fn resolves_nested_inputs() {
        let execution = execution_with_inputs(json!({"a": {"b": 42}}));
        assert_eq!(
            resolve_value("inputs.a.b", &execution, None),
            Some(json!(42))
        );
    }

    #[test]
    fn resolves_prior_step_result_fields() {
        let mut execution = execution_with_inputs(json!({}));
        execution.step_results.insert(
            "step1".to_string(),
            StepExecutionResult {
                step_id: "step1".to_string(),
                status: StepStatus::Completed,
                started_at: Utc::now(),
                completed_at: Some(Utc::now()),
                result: Some(json!({"count": 7})),
                error: None,
                loop_iteration: None,
                loop_total: None,
            },
        );
        assert_eq!(
            resolve_value("step1.result.count", &execution, None),
            Some(json!(7))
        );
        assert_eq!(
            resolve_value("step1.status", &execution, None),
            Some(json!("completed"))
        );
    }

    #[test]
    fn unresolvable_paths_return_none_without_panicking() {
        let execution = execution_with_inputs(json!({"a": 1}));
        assert_eq!(resolve_value("inputs.a.b.c", &execution, None), None);
        assert_eq!(resolve_value("inputs.missing", &execution, None), None);
        assert_eq!(resolve_value("nostep.result", &execution, None), None);
        assert_eq!(resolve_value("context.missing", &execution, None), None);
    }

    #[test]
    fn unknown_root_falls_back_to_inputs() {
        let execution = execution_with_inputs(json!({"items": [1, 2, 3]}));
        assert_eq!(
            resolve_value("items.1", &execution, None),
            Some(json!(2))
        );
    }

    #[test]
    fn context_namespace() {
        let execution = execution_with_inputs(json!({}));
        assert_eq!(
            resolve_value("context.agentId", &execution, None),
            Some(json!("ag-1"))
        );
    }

    #[test]
    fn loop_scope_overlays_inputs() {
        let execution = execution_with_inputs(json!({"x": 1}));
        let scope = LoopScope::for_item(json!({"name": "n0"}), 3);
        assert_eq!(
            resolve_value("inputs._loopItem.name", &execution, Some(&scope)),
            Some(json!("n0"))
        );
        assert_eq!(
            resolve_value("inputs._loopIndex", &execution, Some(&scope)),
            Some(json!(3))
        );
        // Base inputs stay visible through the overlay.
        assert_eq!(
            resolve_value("inputs.x", &execution, Some(&scope)),
            Some(json!(1))
        );
        // And without the scope, the loop variables do not exist.
        assert_eq!(resolve_value("inputs._loopIndex", &execution, None), None);
    }

    #[test]
    fn transforms() {
        assert_eq!(
            apply_transform(Transform::First, json!([5, 6])),
            json!(5)
        );
        assert_eq!(apply_transform(Transform::Last, json!([5, 6])), json!(6));
        assert_eq!(apply_transform(Transform::Count, json!([1, 2, 3])), json!(3));
        assert_eq!(apply_transform(Transform::Count, json!("abc")), json!(3));
        assert_eq!(
            apply_transform(Transform::Sum, json!([1, 2, 3.5])),
            json!(6.5)
        );
        assert_eq!(
            apply_transform(Transform::Join, json!(["a", "b", 3])),
            json!("a,b,3")
        );
        assert_eq!(
            apply_transform(Transform::Json, json!({"k": 1})),
            json!(r#"{"k":1}"#)
        );
    }
}
