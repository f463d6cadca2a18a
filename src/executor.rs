//! Per-step execution: input preparation, action dispatch, and the step-level
//! error recovery policy.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::condition::evaluate_condition;
use crate::error::EngineError;
use crate::event::{EventEmitter, WorkflowEvent, WorkflowEventType};
use crate::execution::{StepExecutionResult, StepStatus, WorkflowExecution};
use crate::resolver::{apply_transform, resolve_value, LoopScope};
use crate::types::{ErrorPolicy, StepAction, WorkflowStep};

/// The externally supplied function the engine calls to perform opaque
/// "tool" actions. Every invocation is treated as a black box; failures are
/// handled per the step's `on_error` policy.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute_tool(&self, tool: &str, params: Value) -> anyhow::Result<Value>;
}

/// Delivery path for `notify` actions. Real senders (email, Slack, webhooks)
/// live outside the engine; the default just logs.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, message: &str, params: &Value) -> anyhow::Result<()>;
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: &str, message: &str, _params: &Value) -> anyhow::Result<()> {
        info!(channel, message, "workflow notification");
        Ok(())
    }
}

pub struct StepExecutor {
    tools: Arc<dyn ToolExecutor>,
    notifier: Arc<dyn Notifier>,
    http: reqwest::Client,
    events: Arc<EventEmitter>,
}

impl StepExecutor {
    pub fn new(
        tools: Arc<dyn ToolExecutor>,
        notifier: Arc<dyn Notifier>,
        events: Arc<EventEmitter>,
    ) -> Self {
        Self {
            tools,
            notifier,
            http: reqwest::Client::new(),
            events,
        }
    }

    /// Execute one step (or one loop iteration of it), record the result
    /// under `result_key`, and apply the step's error policy on failure.
    ///
    /// Returns `Err` only when the failure aborts the whole execution; skip
    /// and continue policies surface as an `Ok` result carrying the step
    /// status.
    pub async fn execute_step(
        &self,
        step: &WorkflowStep,
        execution: &mut WorkflowExecution,
        result_key: &str,
        scope: Option<&LoopScope>,
        loop_iteration: Option<u64>,
        loop_total: Option<u64>,
    ) -> Result<StepExecutionResult, EngineError> {
        let started_at = Utc::now();
        self.emit_step_event(execution, &step.id, WorkflowEventType::StepStarted, None);
        debug!(step_id = %step.id, result_key, "executing step");

        let params = self.prepare_inputs(step, execution, scope);
        let mut attempt = self.run_action(step, params.clone(), execution, scope).await;

        if attempt.is_err() && step.on_error == ErrorPolicy::Retry {
            attempt = self.retry_action(step, &params, execution, scope, attempt).await;
        }

        let record = match attempt {
            Ok(value) => {
                let record = StepExecutionResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Completed,
                    started_at,
                    completed_at: Some(Utc::now()),
                    result: Some(value.clone()),
                    error: None,
                    loop_iteration,
                    loop_total,
                };
                self.emit_step_event(
                    execution,
                    &step.id,
                    WorkflowEventType::StepCompleted,
                    Some(value),
                );
                record
            }
            Err(err) => {
                let message = err.to_string();
                match step.on_error {
                    ErrorPolicy::Skip => {
                        warn!(step_id = %step.id, error = %message, "step failed, skipping");
                        let record = StepExecutionResult {
                            step_id: step.id.clone(),
                            status: StepStatus::Skipped,
                            started_at,
                            completed_at: Some(Utc::now()),
                            result: None,
                            error: Some(message),
                            loop_iteration,
                            loop_total,
                        };
                        self.emit_step_event(
                            execution,
                            &step.id,
                            WorkflowEventType::StepCompleted,
                            Some(json!({"skipped": true})),
                        );
                        record
                    }
                    ErrorPolicy::Continue => {
                        warn!(step_id = %step.id, error = %message, "step failed, continuing");
                        let record = StepExecutionResult {
                            step_id: step.id.clone(),
                            status: StepStatus::Failed,
                            started_at,
                            completed_at: Some(Utc::now()),
                            result: None,
                            error: Some(message.clone()),
                            loop_iteration,
                            loop_total,
                        };
                        self.emit_step_event(
                            execution,
                            &step.id,
                            WorkflowEventType::StepFailed,
                            Some(json!({"error": message})),
                        );
                        record
                    }
                    // Fail outright, or retry that exhausted its attempts.
                    ErrorPolicy::Fail | ErrorPolicy::Retry => {
                        let record = StepExecutionResult {
                            step_id: step.id.clone(),
                            status: StepStatus::Failed,
                            started_at,
                            completed_at: Some(Utc::now()),
                            result: None,
                            error: Some(message.clone()),
                            loop_iteration,
                            loop_total,
                        };
                        execution
                            .step_results
                            .insert(result_key.to_string(), record);
                        self.emit_step_event(
                            execution,
                            &step.id,
                            WorkflowEventType::StepFailed,
                            Some(json!({"error": message})),
                        );
                        return Err(err);
                    }
                }
            }
        };

        execution
            .step_results
            .insert(result_key.to_string(), record.clone());
        Ok(record)
    }

    /// Re-run a failed tool action up to `retry_count` times, sleeping
    /// `retry_delay_ms` before each attempt. Non-tool actions are not
    /// retried and fall through to the default failure handling.
    async fn retry_action(
        &self,
        step: &WorkflowStep,
        params: &Map<String, Value>,
        execution: &WorkflowExecution,
        scope: Option<&LoopScope>,
        mut attempt: Result<Value, EngineError>,
    ) -> Result<Value, EngineError> {
        if !matches!(step.action, StepAction::Tool { .. }) {
            return attempt;
        }

        for retry in 1..=step.retry_count {
            tokio::time::sleep(Duration::from_millis(step.retry_delay_ms)).await;
            info!(step_id = %step.id, retry, "retrying step");
            attempt = self
                .run_action(step, params.clone(), execution, scope)
                .await;
            if attempt.is_ok() {
                break;
            }
        }
        attempt
    }

    /// Merge the step's static inputs with its resolved input mappings.
    /// Mappings that resolve to nothing are dropped rather than wired
    /// through as nulls.
    fn prepare_inputs(
        &self,
        step: &WorkflowStep,
        execution: &WorkflowExecution,
        scope: Option<&LoopScope>,
    ) -> Map<String, Value> {
        let mut merged: Map<String, Value> = step
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for mapping in &step.input_mappings {
            let Some(mut value) = resolve_value(&mapping.from, execution, scope) else {
                debug!(from = %mapping.from, to = %mapping.to, "input mapping did not resolve");
                continue;
            };
            if let Some(transform) = mapping.transform {
                value = apply_transform(transform, value);
            }
            merged.insert(mapping.to.clone(), value);
        }
        merged
    }

    async fn run_action(
        &self,
        step: &WorkflowStep,
        mut params: Map<String, Value>,
        execution: &WorkflowExecution,
        scope: Option<&LoopScope>,
    ) -> Result<Value, EngineError> {
        match &step.action {
            StepAction::Tool { tool } => {
                params.insert("_context".to_string(), json!(execution.context));
                self.tools
                    .execute_tool(tool, Value::Object(params))
                    .await
                    .map_err(|e| EngineError::ActionFailed(format!("tool '{tool}' failed: {e}")))
            }
            StepAction::Api { endpoint, method } => {
                self.call_api(endpoint, method.as_deref(), params).await
            }
            StepAction::Condition => {
                let matched = step
                    .branches
                    .iter()
                    .position(|branch| evaluate_condition(&branch.condition, execution, scope));
                Ok(json!({
                    "matched": matched.is_some(),
                    "branch": matched,
                }))
            }
            StepAction::Delay { delay_ms } => {
                let ms = delay_ms.unwrap_or(1000);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({"delayed": ms}))
            }
            StepAction::Notify { channel, message } => {
                let channel = channel.as_deref().unwrap_or("log");
                let message = message.as_deref().unwrap_or_default();
                self.notifier
                    .notify(channel, message, &Value::Object(params))
                    .await
                    .map_err(|e| {
                        EngineError::ActionFailed(format!("notification to '{channel}' failed: {e}"))
                    })?;
                Ok(json!({"notified": channel}))
            }
            StepAction::SubWorkflow { workflow_id } => Err(EngineError::ActionFailed(format!(
                "step '{}' references sub-workflow '{workflow_id}', which the engine cannot run without an external runner",
                step.id
            ))),
        }
    }

    async fn call_api(
        &self,
        endpoint: &str,
        method: Option<&str>,
        params: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        let method = method.unwrap_or("POST").to_uppercase();
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| EngineError::ActionFailed(format!("invalid HTTP method '{method}'")))?;

        let mut request = self.http.request(method.clone(), endpoint);
        if method != reqwest::Method::GET {
            request = request.json(&params);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::ActionFailed(format!("request to {endpoint} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::ActionFailed(format!(
                "request to {endpoint} returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| EngineError::ActionFailed(format!("reading response from {endpoint}: {e}")))?;
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    fn emit_step_event(
        &self,
        execution: &WorkflowExecution,
        step_id: &str,
        event_type: WorkflowEventType,
        data: Option<Value>,
    ) {
        self.events.emit(&WorkflowEvent::new(
            event_type,
            &execution.id,
            &execution.workflow_id,
            Some(step_id),
            data,
        ));
    }
}
