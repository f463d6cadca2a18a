//! Loop steps: repeat a step's action under `for_each` / `count` / `while`
//! semantics, bounded by the per-loop iteration cap and the global visit
//! budget.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::condition::evaluate_condition;
use crate::engine::{interruption, VisitBudget};
use crate::error::EngineError;
use crate::execution::{
    iteration_key, ExecutionStatus, StepExecutionResult, StepStatus, WorkflowExecution,
};
use crate::executor::StepExecutor;
use crate::resolver::{resolve_value, LoopScope};
use crate::store::ExecutionStore;
use crate::types::{LoopKind, WorkflowLoop, WorkflowStep};

/// Run every iteration of a loop step, recording each iteration under
/// `{stepId}_{index}` and the ordered aggregate under the step's own id.
///
/// Returns `Some(status)` when a pause or cancel was observed between
/// iterations; the orchestration loop stops advancing in that case.
pub(crate) async fn execute_loop(
    executor: &StepExecutor,
    store: &dyn ExecutionStore,
    step: &WorkflowStep,
    loop_config: &WorkflowLoop,
    execution: &mut WorkflowExecution,
    budget: &mut VisitBudget,
) -> Result<Option<ExecutionStatus>, EngineError> {
    let started_at = Utc::now();
    let mut collected: Vec<Value> = Vec::new();

    let interrupted = match loop_config.loop_type {
        LoopKind::ForEach => {
            let source = loop_config.source.as_deref().ok_or_else(|| {
                EngineError::LoopSource(format!("for_each loop '{}' requires a source", step.id))
            })?;
            let resolved = resolve_value(source, execution, None).ok_or_else(|| {
                EngineError::LoopSource(format!("loop source '{source}' did not resolve"))
            })?;
            let Value::Array(items) = resolved else {
                return Err(EngineError::LoopSource(format!(
                    "loop source '{source}' is not an array"
                )));
            };

            let total = items.len().min(loop_config.max_iterations as usize);
            debug!(step_id = %step.id, total, "starting for_each loop");
            let mut interrupted = None;
            for (index, item) in items.into_iter().take(total).enumerate() {
                if let Some(status) = interruption(store, &execution.id).await {
                    interrupted = Some(status);
                    break;
                }
                budget.charge()?;
                let index = index as u64;
                let scope = LoopScope::for_item(item, index);
                let record = executor
                    .execute_step(
                        step,
                        execution,
                        &iteration_key(&step.id, index),
                        Some(&scope),
                        Some(index),
                        Some(total as u64),
                    )
                    .await?;
                collected.push(record.result.unwrap_or(Value::Null));
            }
            interrupted
        }
        LoopKind::Count => {
            let count = loop_config.count.ok_or_else(|| {
                EngineError::LoopSource(format!("count loop '{}' requires a count", step.id))
            })?;
            let total = count.min(loop_config.max_iterations);
            debug!(step_id = %step.id, total, "starting count loop");
            let mut interrupted = None;
            for index in 0..total {
                if let Some(status) = interruption(store, &execution.id).await {
                    interrupted = Some(status);
                    break;
                }
                budget.charge()?;
                let scope = LoopScope::for_index(index);
                let record = executor
                    .execute_step(
                        step,
                        execution,
                        &iteration_key(&step.id, index),
                        Some(&scope),
                        Some(index),
                        Some(total),
                    )
                    .await?;
                collected.push(record.result.unwrap_or(Value::Null));
            }
            interrupted
        }
        LoopKind::While => {
            let condition = loop_config.condition.as_ref().ok_or_else(|| {
                EngineError::LoopSource(format!("while loop '{}' requires a condition", step.id))
            })?;
            debug!(step_id = %step.id, "starting while loop");
            let mut interrupted = None;
            let mut index = 0u64;
            while index < loop_config.max_iterations {
                if let Some(status) = interruption(store, &execution.id).await {
                    interrupted = Some(status);
                    break;
                }
                // The condition sees the same iteration scope the step does,
                // so `inputs._loopIndex` behaves consistently across all
                // three loop kinds.
                let scope = LoopScope::for_index(index);
                if !evaluate_condition(condition, execution, Some(&scope)) {
                    break;
                }
                budget.charge()?;
                let record = executor
                    .execute_step(
                        step,
                        execution,
                        &iteration_key(&step.id, index),
                        Some(&scope),
                        Some(index),
                        None,
                    )
                    .await?;
                collected.push(record.result.unwrap_or(Value::Null));
                index += 1;
            }
            interrupted
        }
    };

    if interrupted.is_none() {
        let total = collected.len() as u64;
        execution.step_results.insert(
            step.id.clone(),
            StepExecutionResult {
                step_id: step.id.clone(),
                status: StepStatus::Completed,
                started_at,
                completed_at: Some(Utc::now()),
                result: Some(Value::Array(collected)),
                error: None,
                loop_iteration: None,
                loop_total: Some(total),
            },
        );
    }

    Ok(interrupted)
}
