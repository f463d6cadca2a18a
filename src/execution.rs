use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::WorkflowDefinition;

/// One run instance of a workflow definition: the mutable record the engine
/// updates as it walks the step graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub workflow_version: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    /// Populated only on success: one entry per completed result key.
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    /// Keyed by result key: step id, or `{stepId}_{iteration}` for loop
    /// iterations. The loop step's own key holds the aggregated array.
    #[serde(default)]
    pub step_results: HashMap<String, StepExecutionResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Opaque caller passthrough (agent/company/user ids and the like).
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

impl WorkflowExecution {
    pub fn new(workflow: &WorkflowDefinition, request: &ExecuteWorkflowRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            workflow_version: workflow.version.clone(),
            status: ExecutionStatus::Running,
            current_step_id: Some(workflow.start_step_id.clone()),
            inputs: request.inputs.clone(),
            outputs: HashMap::new(),
            step_results: HashMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            context: request.context.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses are monotonic: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionResult {
    pub step_id: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_iteration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_total: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Result key for an individual loop iteration.
pub fn iteration_key(step_id: &str, iteration: u64) -> String {
    format!("{step_id}_{iteration}")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteWorkflowRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Reserved: the engine always runs synchronously per request.
    #[serde(rename = "async", default)]
    pub async_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteWorkflowResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<HashMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_results: Option<HashMap<String, StepExecutionResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
