//! Workflow definition loading and load-time validation.
//!
//! Definitions parse from YAML (JSON is a YAML subset, so both work).
//! Reference validation happens here, before the first step runs, so a
//! dangling `nextStepId` or branch target fails the load instead of the
//! hundredth execution.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::EngineError;
use crate::types::{LoopKind, WorkflowDefinition};

#[derive(Debug, Default)]
pub struct WorkflowParser;

impl WorkflowParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowDefinition> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read workflow file: {:?}", path.as_ref()))?;
        self.parse_str(&content)
    }

    pub fn parse_str(&self, content: &str) -> Result<WorkflowDefinition> {
        let workflow: WorkflowDefinition = serde_yaml::from_str(content)
            .map_err(|e| EngineError::Parse(e.to_string()))
            .context("Failed to parse workflow definition")?;
        validate_definition(&workflow)?;
        Ok(workflow)
    }
}

/// Structural validation of a definition: non-empty identity, unique step
/// ids, resolvable start/next/branch targets, and well-formed loops.
pub fn validate_definition(workflow: &WorkflowDefinition) -> Result<(), EngineError> {
    if workflow.id.is_empty() {
        return Err(EngineError::Validation("workflow id cannot be empty".into()));
    }
    if workflow.name.is_empty() {
        return Err(EngineError::Validation(
            "workflow name cannot be empty".into(),
        ));
    }
    if workflow.steps.is_empty() {
        return Err(EngineError::Validation(
            "workflow must have at least one step".into(),
        ));
    }

    let mut ids = HashSet::new();
    for step in &workflow.steps {
        if step.id.is_empty() {
            return Err(EngineError::Validation("step id cannot be empty".into()));
        }
        if !ids.insert(step.id.as_str()) {
            return Err(EngineError::Validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }

    if !ids.contains(workflow.start_step_id.as_str()) {
        return Err(EngineError::StepNotFound(format!(
            "start step '{}' does not exist",
            workflow.start_step_id
        )));
    }

    for step in &workflow.steps {
        if let Some(next) = &step.next_step_id {
            if !ids.contains(next.as_str()) {
                return Err(EngineError::StepNotFound(format!(
                    "step '{}' points at unknown step '{next}'",
                    step.id
                )));
            }
        }
        for branch in &step.branches {
            if let Some(next) = &branch.next_step_id {
                if !ids.contains(next.as_str()) {
                    return Err(EngineError::StepNotFound(format!(
                        "branch on step '{}' points at unknown step '{next}'",
                        step.id
                    )));
                }
            }
        }
        if let Some(loop_config) = &step.loop_config {
            match loop_config.loop_type {
                LoopKind::ForEach if loop_config.source.is_none() => {
                    return Err(EngineError::Validation(format!(
                        "for_each loop on step '{}' requires a source",
                        step.id
                    )));
                }
                LoopKind::While if loop_config.condition.is_none() => {
                    return Err(EngineError::Validation(format!(
                        "while loop on step '{}' requires a condition",
                        step.id
                    )));
                }
                LoopKind::Count if loop_config.count.is_none() => {
                    return Err(EngineError::Validation(format!(
                        "count loop on step '{}' requires a count",
                        step.id
                    )));
                }
                _ => {}
            }
        }
    }

    Ok(())
}
