use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A statically-defined workflow: an ordered collection of steps plus the id
/// of the step execution begins at. Immutable once execution starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<InputSchema>,
    pub steps: Vec<WorkflowStep>,
    pub start_step_id: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowDefinition {
    /// Index steps by id for O(1) lookup during the orchestration loop.
    pub fn step_map(&self) -> HashMap<&str, &WorkflowStep> {
        self.steps.iter().map(|s| (s.id.as_str(), s)).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub fields: HashMap<String, InputField>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputField {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A single node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub action: StepAction,
    /// Static inputs, merged with mapped values before dispatch.
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub input_mappings: Vec<InputMapping>,
    /// Conditional successors, evaluated in order before `next_step_id`.
    #[serde(default)]
    pub branches: Vec<StepBranch>,
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub loop_config: Option<WorkflowLoop>,
    #[serde(default)]
    pub on_error: ErrorPolicy,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Recorded but not enforced; enforcing it requires racing the action
    /// against a timer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Default successor. `None` terminates the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
}

fn default_retry_delay_ms() -> u64 {
    1000
}

/// The unit of work a step performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StepAction {
    /// Invoke the externally supplied tool executor.
    Tool { tool: String },
    /// HTTP call; method defaults to POST, JSON body = merged inputs.
    Api {
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
    },
    /// Evaluate the step's own branches without side effects.
    Condition,
    /// Suspend for `delay_ms` (default 1000).
    Delay {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
    },
    /// Forward to the injected notification path.
    Notify {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Declared for definition compatibility; the core engine carries no
    /// sub-workflow registry, so executing one fails the step.
    SubWorkflow { workflow_id: String },
}

/// Wires a dynamically resolved value into a step's inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMapping {
    /// Dot-path: `inputs.*`, `context.*`, or `<stepId>.*`.
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    First,
    Last,
    Count,
    Sum,
    Join,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepBranch {
    pub condition: WorkflowCondition,
    /// `None` terminates the workflow when the branch matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCondition {
    /// Dot-path resolved against the run state.
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
    RegexMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowLoop {
    #[serde(rename = "type")]
    pub loop_type: LoopKind,
    /// Path to an array (for_each only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Re-evaluated before each iteration (while only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<WorkflowCondition>,
    /// Fixed iteration count (count only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Hard ceiling regardless of declared count or array length.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

fn default_max_iterations() -> u64 {
    100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    ForEach,
    While,
    Count,
}

/// What to do when a step's action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the whole execution (default).
    #[default]
    Fail,
    /// Swallow the error and mark the step skipped.
    Skip,
    /// Re-run the tool action up to `retry_count` times, then fail.
    Retry,
    /// Mark the step failed but keep the workflow moving.
    Continue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_action_round_trips_snake_case_tags() {
        let action: StepAction =
            serde_json::from_value(json!({"type": "tool", "tool": "search"})).unwrap();
        assert!(matches!(action, StepAction::Tool { ref tool } if tool == "search"));

        let action: StepAction = serde_json::from_value(
            json!({"type": "api", "endpoint": "https://example.com/hook"}),
        )
        .unwrap();
        assert!(matches!(action, StepAction::Api { ref method, .. } if method.is_none()));

        let action: StepAction =
            serde_json::from_value(json!({"type": "sub_workflow", "workflowId": "wf-2"})).unwrap();
        assert!(matches!(action, StepAction::SubWorkflow { .. }));
    }

    #[test]
    fn step_defaults_apply() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "id": "s1",
            "name": "first",
            "action": {"type": "delay"}
        }))
        .unwrap();

        assert_eq!(step.on_error, ErrorPolicy::Fail);
        assert_eq!(step.retry_count, 0);
        assert_eq!(step.retry_delay_ms, 1000);
        assert!(step.inputs.is_empty());
        assert!(step.branches.is_empty());
        assert!(step.next_step_id.is_none());
    }

    #[test]
    fn loop_max_iterations_defaults_to_100() {
        let lp: WorkflowLoop = serde_json::from_value(json!({
            "type": "for_each",
            "source": "inputs.items"
        }))
        .unwrap();
        assert_eq!(lp.loop_type, LoopKind::ForEach);
        assert_eq!(lp.max_iterations, 100);
    }

    #[test]
    fn condition_operator_tags() {
        let cond: WorkflowCondition = serde_json::from_value(json!({
            "field": "step1.result.count",
            "operator": "greater_than",
            "value": 3
        }))
        .unwrap();
        assert_eq!(cond.operator, ConditionOperator::GreaterThan);
    }
}
