//! Execution storage port.
//!
//! The engine is written against the `ExecutionStore` trait so the in-memory
//! backend used here (and in tests) can be swapped for a durable one without
//! touching the orchestration loop.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::EngineError;
use crate::execution::{ExecutionStatus, WorkflowExecution};

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert(&self, execution: WorkflowExecution);

    async fn get(&self, id: &str) -> Option<WorkflowExecution>;

    /// Persist the engine's working copy of a run. The stored status wins
    /// over an incoming `Running` when a pause or cancel landed in between,
    /// and terminal statuses are never overwritten.
    ///
    /// A terminal snapshot does overwrite a stored `Paused`: pause takes
    /// effect at step boundaries, so a step that completes the run or fails
    /// it while a pause request is pending still finalizes the run. External
    /// callers cannot do this; `set_status` rejects `Paused` -> terminal
    /// except for cancellation.
    async fn update(&self, execution: &WorkflowExecution);

    async fn status(&self, id: &str) -> Option<ExecutionStatus>;

    /// Transition a run's status. Enforced transitions: pause only from
    /// running, cancel from running or paused, complete/fail only from
    /// running.
    async fn set_status(&self, id: &str, status: ExecutionStatus) -> Result<(), EngineError>;
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<String, WorkflowExecution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn transition_allowed(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    use ExecutionStatus::*;
    match to {
        Paused => from == Running,
        Cancelled => matches!(from, Running | Paused),
        Completed | Failed => from == Running,
        Running => from == Running,
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, execution: WorkflowExecution) {
        let mut executions = self.executions.write().await;
        executions.insert(execution.id.clone(), execution);
    }

    async fn get(&self, id: &str) -> Option<WorkflowExecution> {
        let executions = self.executions.read().await;
        executions.get(id).cloned()
    }

    async fn update(&self, execution: &WorkflowExecution) {
        let mut executions = self.executions.write().await;
        let mut incoming = execution.clone();
        if let Some(existing) = executions.get(&execution.id) {
            let stored = existing.status;
            // A concurrent pause/cancel must not be clobbered by the engine's
            // periodic snapshots.
            if incoming.status == ExecutionStatus::Running && stored != ExecutionStatus::Running {
                incoming.status = stored;
            }
            if stored.is_terminal() {
                incoming.status = stored;
            }
        }
        executions.insert(incoming.id.clone(), incoming);
    }

    async fn status(&self, id: &str) -> Option<ExecutionStatus> {
        let executions = self.executions.read().await;
        executions.get(id).map(|e| e.status)
    }

    async fn set_status(&self, id: &str, status: ExecutionStatus) -> Result<(), EngineError> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(id)
            .ok_or_else(|| EngineError::ExecutionNotFound(id.to_string()))?;

        if !transition_allowed(execution.status, status) {
            return Err(EngineError::InvalidTransition(format!(
                "{:?} -> {:?} for execution {id}",
                execution.status, status
            )));
        }

        execution.status = status;
        if status.is_terminal() && execution.completed_at.is_none() {
            execution.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecuteWorkflowRequest;
    use crate::types::WorkflowDefinition;
    use serde_json::json;

    fn sample_execution() -> WorkflowExecution {
        let workflow: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf", "name": "wf",
            "steps": [{"id": "s", "name": "s", "action": {"type": "delay"}}],
            "startStepId": "s"
        }))
        .unwrap();
        WorkflowExecution::new(&workflow, &ExecuteWorkflowRequest::default())
    }

    #[test]
    fn pause_only_from_running() {
        tokio_test::block_on(async {
            let store = InMemoryExecutionStore::new();
            let execution = sample_execution();
            let id = execution.id.clone();
            store.insert(execution).await;

            store.set_status(&id, ExecutionStatus::Paused).await.unwrap();
            assert_eq!(store.status(&id).await, Some(ExecutionStatus::Paused));
            // Pausing twice is rejected.
            assert!(store.set_status(&id, ExecutionStatus::Paused).await.is_err());
        });
    }

    #[test]
    fn cancel_from_running_or_paused_but_never_out_of_terminal() {
        tokio_test::block_on(async {
            let store = InMemoryExecutionStore::new();
            let execution = sample_execution();
            let id = execution.id.clone();
            store.insert(execution).await;

            store.set_status(&id, ExecutionStatus::Paused).await.unwrap();
            store.set_status(&id, ExecutionStatus::Cancelled).await.unwrap();
            assert!(store
                .set_status(&id, ExecutionStatus::Running)
                .await
                .is_err());
            assert!(store
                .set_status(&id, ExecutionStatus::Completed)
                .await
                .is_err());
        });
    }

    #[test]
    fn set_status_on_unknown_execution_reports_execution_not_found() {
        tokio_test::block_on(async {
            let store = InMemoryExecutionStore::new();
            let err = store
                .set_status("no-such-run", ExecutionStatus::Paused)
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::ExecutionNotFound(_)));
        });
    }

    #[test]
    fn step_failure_finalizes_a_run_with_a_pause_pending() {
        tokio_test::block_on(async {
            let store = InMemoryExecutionStore::new();
            let mut execution = sample_execution();
            let id = execution.id.clone();
            store.insert(execution.clone()).await;

            // Pause lands while a step is in flight; the step then fails and
            // the engine persists the terminal snapshot.
            store.set_status(&id, ExecutionStatus::Paused).await.unwrap();
            execution.status = ExecutionStatus::Failed;
            store.update(&execution).await;
            assert_eq!(store.status(&id).await, Some(ExecutionStatus::Failed));
        });
    }

    #[test]
    fn update_preserves_concurrent_cancel() {
        tokio_test::block_on(async {
            let store = InMemoryExecutionStore::new();
            let execution = sample_execution();
            let id = execution.id.clone();
            store.insert(execution.clone()).await;

            store.set_status(&id, ExecutionStatus::Cancelled).await.unwrap();
            // Engine snapshot still says Running; the stored cancel wins.
            store.update(&execution).await;
            assert_eq!(store.status(&id).await, Some(ExecutionStatus::Cancelled));
        });
    }
}
