//! The top-level driver: validates the run, walks the step graph via the
//! step and loop executors, advances through branches, and finalizes the
//! execution with exactly one terminal event.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::condition::evaluate_condition;
use crate::error::EngineError;
use crate::event::{EventEmitter, EventHandler, WorkflowEvent, WorkflowEventType};
use crate::execution::{
    ExecuteWorkflowRequest, ExecuteWorkflowResponse, ExecutionStatus, StepStatus,
    WorkflowExecution,
};
use crate::executor::{LogNotifier, Notifier, StepExecutor, ToolExecutor};
use crate::loops::execute_loop;
use crate::parser::validate_definition;
use crate::store::{ExecutionStore, InMemoryExecutionStore};
use crate::types::{WorkflowDefinition, WorkflowStep};

/// Global safety valve: total step visits per run, loop iterations included.
/// Independent of any per-loop `max_iterations`.
pub const MAX_TOTAL_STEPS: usize = 1000;

/// Counts step visits against the global cap.
pub(crate) struct VisitBudget {
    used: usize,
    limit: usize,
}

impl VisitBudget {
    pub(crate) fn new(limit: usize) -> Self {
        Self { used: 0, limit }
    }

    pub(crate) fn charge(&mut self) -> Result<(), EngineError> {
        self.used += 1;
        if self.used > self.limit {
            Err(EngineError::RunawayWorkflow(self.limit))
        } else {
            Ok(())
        }
    }
}

/// Check for a pause or cancel that landed since the last step.
pub(crate) async fn interruption(
    store: &dyn ExecutionStore,
    execution_id: &str,
) -> Option<ExecutionStatus> {
    match store.status(execution_id).await {
        Some(status @ (ExecutionStatus::Paused | ExecutionStatus::Cancelled)) => Some(status),
        _ => None,
    }
}

pub struct WorkflowEngine {
    executor: StepExecutor,
    store: Arc<dyn ExecutionStore>,
    events: Arc<EventEmitter>,
}

impl WorkflowEngine {
    /// Engine with the in-memory execution store and logging notifier.
    pub fn new(tools: Arc<dyn ToolExecutor>) -> Self {
        Self::with_store(tools, Arc::new(InMemoryExecutionStore::new()))
    }

    pub fn with_store(tools: Arc<dyn ToolExecutor>, store: Arc<dyn ExecutionStore>) -> Self {
        Self::with_notifier(tools, store, Arc::new(LogNotifier))
    }

    pub fn with_notifier(
        tools: Arc<dyn ToolExecutor>,
        store: Arc<dyn ExecutionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let events = Arc::new(EventEmitter::new());
        Self {
            executor: StepExecutor::new(tools, notifier, events.clone()),
            store,
            events,
        }
    }

    /// Register a lifecycle event handler. Handlers are called synchronously,
    /// in registration order, once per event.
    pub fn on_event(&self, handler: EventHandler) {
        self.events.on_event(handler);
    }

    /// Run one workflow to completion. Failures never surface as `Err`: the
    /// response carries the terminal status and error message, and exactly
    /// one terminal event is emitted for every run that ends.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        request: ExecuteWorkflowRequest,
    ) -> ExecuteWorkflowResponse {
        let mut execution = WorkflowExecution::new(workflow, &request);
        self.store.insert(execution.clone()).await;

        if let Err(err) = self.prepare(workflow, &mut execution) {
            // Validation failures end the run before the started event.
            return self.finalize_failed(execution, err).await;
        }

        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            "workflow started"
        );
        self.emit(
            &execution,
            WorkflowEventType::Started,
            None,
            Some(json!({"inputs": execution.inputs})),
        );

        match self.drive(workflow, &mut execution).await {
            Ok(None) => self.finalize_completed(execution).await,
            Ok(Some(ExecutionStatus::Cancelled)) => self.finalize_cancelled(execution).await,
            Ok(Some(_paused)) => self.suspend_paused(execution).await,
            Err(err) => self.finalize_failed(execution, err).await,
        }
    }

    pub async fn get_execution(&self, id: &str) -> Option<WorkflowExecution> {
        self.store.get(id).await
    }

    /// Valid only from `running`. The loop observes the flag before the next
    /// step or loop iteration; the in-flight action still runs to completion.
    pub async fn pause_execution(&self, id: &str) -> Result<(), EngineError> {
        self.store.set_status(id, ExecutionStatus::Paused).await
    }

    /// Valid from `running` or `paused`.
    pub async fn cancel_execution(&self, id: &str) -> Result<(), EngineError> {
        self.store.set_status(id, ExecutionStatus::Cancelled).await
    }

    /// Definition and input validation, then input-schema defaults.
    fn prepare(
        &self,
        workflow: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
    ) -> Result<(), EngineError> {
        validate_definition(workflow)?;

        if let Some(schema) = &workflow.input_schema {
            for name in &schema.required {
                if !execution.inputs.contains_key(name) {
                    return Err(EngineError::Validation(format!(
                        "required input '{name}' is missing"
                    )));
                }
            }
            for (name, field) in &schema.fields {
                if let Some(default) = &field.default {
                    execution
                        .inputs
                        .entry(name.clone())
                        .or_insert_with(|| default.clone());
                }
            }
        }
        Ok(())
    }

    /// Walk the graph until there is no next step, an interruption is
    /// observed, or the visit budget runs out.
    async fn drive(
        &self,
        workflow: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
    ) -> Result<Option<ExecutionStatus>, EngineError> {
        let steps = workflow.step_map();
        let mut budget = VisitBudget::new(MAX_TOTAL_STEPS);

        while let Some(step_id) = execution.current_step_id.clone() {
            if let Some(status) = interruption(self.store.as_ref(), &execution.id).await {
                return Ok(Some(status));
            }

            let step = steps
                .get(step_id.as_str())
                .copied()
                .ok_or_else(|| EngineError::StepNotFound(step_id.clone()))?;

            let next = if let Some(loop_config) = &step.loop_config {
                if let Some(status) = execute_loop(
                    &self.executor,
                    self.store.as_ref(),
                    step,
                    loop_config,
                    execution,
                    &mut budget,
                )
                .await?
                {
                    return Ok(Some(status));
                }
                // Loops do not branch on their own outcome.
                step.next_step_id.clone()
            } else {
                budget.charge()?;
                self.executor
                    .execute_step(step, execution, &step.id, None, None, None)
                    .await?;
                determine_next_step(step, execution)
            };

            execution.current_step_id = next;
            self.store.update(execution).await;
        }

        Ok(None)
    }

    async fn finalize_completed(&self, mut execution: WorkflowExecution) -> ExecuteWorkflowResponse {
        execution.outputs = execution
            .step_results
            .iter()
            .filter(|(_, r)| r.status == StepStatus::Completed)
            .map(|(key, r)| (key.clone(), r.result.clone().unwrap_or(Value::Null)))
            .collect();
        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(chrono::Utc::now());
        self.store.update(&execution).await;

        // A cancel can land between the last status check and here; the
        // store keeps the cancelled status and the run finalizes as such.
        if self.store.status(&execution.id).await == Some(ExecutionStatus::Cancelled) {
            return self.finalize_cancelled(execution).await;
        }

        info!(execution_id = %execution.id, "workflow completed");
        self.emit(
            &execution,
            WorkflowEventType::Completed,
            None,
            Some(json!(execution.outputs)),
        );
        ExecuteWorkflowResponse {
            execution_id: execution.id.clone(),
            status: ExecutionStatus::Completed,
            outputs: Some(execution.outputs.clone()),
            step_results: Some(execution.step_results),
            error: None,
        }
    }

    async fn finalize_failed(
        &self,
        mut execution: WorkflowExecution,
        err: EngineError,
    ) -> ExecuteWorkflowResponse {
        let message = err.to_string();
        warn!(execution_id = %execution.id, error = %message, "workflow failed");
        execution.status = ExecutionStatus::Failed;
        execution.error = Some(message.clone());
        execution.completed_at = Some(chrono::Utc::now());
        self.store.update(&execution).await;

        self.emit(
            &execution,
            WorkflowEventType::Failed,
            None,
            Some(json!({"error": message})),
        );
        ExecuteWorkflowResponse {
            execution_id: execution.id.clone(),
            status: ExecutionStatus::Failed,
            outputs: None,
            step_results: Some(execution.step_results),
            error: Some(message),
        }
    }

    /// A cancelled run still gets its one terminal event; it reports as a
    /// failure with a cancellation message.
    async fn finalize_cancelled(&self, mut execution: WorkflowExecution) -> ExecuteWorkflowResponse {
        let message = "execution was cancelled".to_string();
        info!(execution_id = %execution.id, "workflow cancelled");
        execution.status = ExecutionStatus::Cancelled;
        execution.error = Some(message.clone());
        execution.completed_at = Some(chrono::Utc::now());
        self.store.update(&execution).await;

        self.emit(
            &execution,
            WorkflowEventType::Failed,
            None,
            Some(json!({"error": message})),
        );
        ExecuteWorkflowResponse {
            execution_id: execution.id.clone(),
            status: ExecutionStatus::Cancelled,
            outputs: None,
            step_results: Some(execution.step_results),
            error: Some(message),
        }
    }

    /// A paused run stops advancing but is not terminal: no terminal event,
    /// `current_step_id` marks where it stopped.
    async fn suspend_paused(&self, mut execution: WorkflowExecution) -> ExecuteWorkflowResponse {
        info!(
            execution_id = %execution.id,
            current_step = ?execution.current_step_id,
            "workflow paused"
        );
        execution.status = ExecutionStatus::Paused;
        self.store.update(&execution).await;

        ExecuteWorkflowResponse {
            execution_id: execution.id.clone(),
            status: ExecutionStatus::Paused,
            outputs: None,
            step_results: Some(execution.step_results),
            error: None,
        }
    }

    fn emit(
        &self,
        execution: &WorkflowExecution,
        event_type: WorkflowEventType,
        step_id: Option<&str>,
        data: Option<Value>,
    ) {
        self.events.emit(&WorkflowEvent::new(
            event_type,
            &execution.id,
            &execution.workflow_id,
            step_id,
            data,
        ));
    }
}

/// First matching branch wins, in declaration order; otherwise the step's
/// default successor. `None` terminates the workflow.
fn determine_next_step(step: &WorkflowStep, execution: &WorkflowExecution) -> Option<String> {
    for branch in &step.branches {
        if evaluate_condition(&branch.condition, execution, None) {
            return branch.next_step_id.clone();
        }
    }
    step.next_step_id.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn visit_budget_trips_past_the_limit() {
        let mut budget = VisitBudget::new(3);
        assert!(budget.charge().is_ok());
        assert!(budget.charge().is_ok());
        assert!(budget.charge().is_ok());
        assert!(matches!(
            budget.charge(),
            Err(EngineError::RunawayWorkflow(3))
        ));
    }

    #[test]
    fn branches_evaluate_in_order_with_default_fallback() {
        let workflow: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf", "name": "wf",
            "steps": [{
                "id": "s1", "name": "s1",
                "action": {"type": "delay"},
                "branches": [
                    {
                        "condition": {"field": "inputs.kind", "operator": "equals", "value": "a"},
                        "nextStepId": "step-a"
                    },
                    {
                        "condition": {"field": "inputs.kind", "operator": "is_not_empty"},
                        "nextStepId": "step-any"
                    }
                ],
                "nextStepId": "step-default"
            }],
            "startStepId": "s1"
        }))
        .unwrap();
        let step = &workflow.steps[0];

        let mut execution = WorkflowExecution::new(
            &workflow,
            &ExecuteWorkflowRequest {
                workflow_id: "wf".to_string(),
                ..Default::default()
            },
        );

        execution.inputs.insert("kind".to_string(), json!("a"));
        assert_eq!(
            determine_next_step(step, &execution),
            Some("step-a".to_string())
        );

        execution.inputs.insert("kind".to_string(), json!("z"));
        assert_eq!(
            determine_next_step(step, &execution),
            Some("step-any".to_string())
        );

        execution.inputs.remove("kind");
        assert_eq!(
            determine_next_step(step, &execution),
            Some("step-default".to_string())
        );
    }
}
