//! # Stepflow
//!
//! A workflow execution engine: walks a statically-defined graph of steps,
//! each invoking an opaque action (tool call, HTTP call, condition check,
//! delay, notification), with loops, conditional branching, input wiring
//! between steps, retry/skip/continue error policies, and lifecycle events.
//!
//! Single-threaded per run: exactly one step (or loop iteration) is in
//! flight at a time, and `execute` drives one run synchronously from start
//! to terminal status.
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use stepflow::{ExecuteWorkflowRequest, ToolExecutor, WorkflowEngine, WorkflowParser};
//!
//! struct MyTools;
//!
//! #[async_trait]
//! impl ToolExecutor for MyTools {
//!     async fn execute_tool(&self, tool: &str, params: Value) -> anyhow::Result<Value> {
//!         Ok(json!({"tool": tool, "params": params}))
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let workflow = WorkflowParser::new().parse_file("enrich.yaml")?;
//! let engine = WorkflowEngine::new(Arc::new(MyTools));
//! let response = engine
//!     .execute(&workflow, ExecuteWorkflowRequest {
//!         workflow_id: workflow.id.clone(),
//!         ..Default::default()
//!     })
//!     .await;
//! println!("{:?}", response.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - `types` - workflow definition data model
//! - `execution` - run records, step results, request/response contract
//! - `engine` - the orchestration loop and query/control API
//! - `executor` - per-step action dispatch and error policy
//! - `loops` - for_each / count / while loop execution
//! - `resolver` - dot-path value resolution and input-mapping transforms
//! - `condition` - typed comparisons for branches and while loops
//! - `event` - lifecycle events and the synchronous emitter
//! - `store` - execution storage port with an in-memory backend
//! - `parser` - definition loading and load-time validation

pub mod condition;
pub mod engine;
pub mod error;
pub mod event;
pub mod execution;
pub mod executor;
mod loops;
pub mod parser;
pub mod resolver;
pub mod store;
pub mod types;

pub use condition::evaluate_condition;
pub use engine::{WorkflowEngine, MAX_TOTAL_STEPS};
pub use error::EngineError;
pub use event::{EventEmitter, EventHandler, WorkflowEvent, WorkflowEventType};
pub use execution::{
    iteration_key, ExecuteWorkflowRequest, ExecuteWorkflowResponse, ExecutionStatus,
    StepExecutionResult, StepStatus, WorkflowExecution,
};
pub use executor::{LogNotifier, Notifier, StepExecutor, ToolExecutor};
pub use parser::{validate_definition, WorkflowParser};
pub use resolver::{apply_transform, resolve_value, LoopScope};
pub use store::{ExecutionStore, InMemoryExecutionStore};
pub use types::{
    ConditionOperator, ErrorPolicy, InputMapping, InputSchema, LoopKind, StepAction, StepBranch,
    Transform, WorkflowCondition, WorkflowDefinition, WorkflowLoop, WorkflowStep,
};
