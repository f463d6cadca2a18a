//! Lifecycle events: synchronous multicast to registered listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    Started,
    StepStarted,
    StepCompleted,
    StepFailed,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    #[serde(rename = "type")]
    pub event_type: WorkflowEventType,
    pub execution_id: String,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WorkflowEvent {
    pub fn new(
        event_type: WorkflowEventType,
        execution_id: &str,
        workflow_id: &str,
        step_id: Option<&str>,
        data: Option<Value>,
    ) -> Self {
        Self {
            event_type,
            execution_id: execution_id.to_string(),
            workflow_id: workflow_id.to_string(),
            step_id: step_id.map(String::from),
            timestamp: Utc::now(),
            data,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Calls every registered handler once per event, in registration order, on
/// the emitting task. No delivery guarantee beyond "called once, in-process".
#[derive(Default)]
pub struct EventEmitter {
    handlers: RwLock<Vec<EventHandler>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&self, handler: EventHandler) {
        let mut handlers = match self.handlers.write() {
            Ok(handlers) => handlers,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.push(handler);
    }

    pub fn emit(&self, event: &WorkflowEvent) {
        debug!(
            event_type = ?event.event_type,
            execution_id = %event.execution_id,
            step_id = ?event.step_id,
            "workflow event"
        );
        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handler in handlers.iter() {
            handler(event);
        }
    }
}
