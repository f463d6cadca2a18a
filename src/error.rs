use thiserror::Error;

/// Errors raised by the workflow engine.
///
/// Only `ActionFailed` participates in per-step error recovery (`on_error`);
/// every other kind aborts the run regardless of step policy.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("loop source error: {0}")]
    LoopSource(String),

    #[error("runaway workflow: exceeded {0} total step executions")]
    RunawayWorkflow(usize),

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("parse error: {0}")]
    Parse(String),
}
