//! Task pipeline.
//!
//! # Data Flow
//! ```text
//! WebServiceConfig.events
//!     → migrate.rs upgrades old option/condition versions
//!     → registry.rs resolves handler names and compiles conditions
//!     → PhaseRunner (one per web service, immutable)
//!     → run(phase, &mut AnalyzableContent) at each processor transition
//! ```
//!
//! # Design Decisions
//! - Tasks of a phase run sequentially, in configuration order
//! - A task runs only when one of its condition roots is satisfied
//! - Fail-open: an error or a panic inside a task is logged and counted,
//!   and the next task still runs

pub mod migrate;
pub mod registry;
pub mod tasks;

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::{evaluate_roots, ConditionNode};
use crate::observability::metrics;
use crate::telemetry::AnalyzableContent;

pub use registry::Registry;

/// Points in an exchange where tasks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Before the outbound request is built and sent.
    DestinationRequestPreparation,
    /// Response head available (destination or fallback).
    StartedReceiving,
    /// Response fully emitted to the client.
    EmittedResponse,
    /// The destination could not be reached and no fallback existed.
    DestinationReachFailure,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::DestinationRequestPreparation,
        Phase::StartedReceiving,
        Phase::EmittedResponse,
        Phase::DestinationReachFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::DestinationRequestPreparation => "destination_request_preparation",
            Phase::StartedReceiving => "started_receiving",
            Phase::EmittedResponse => "emitted_response",
            Phase::DestinationReachFailure => "destination_reach_failure",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("component `{0}` is not present")]
    MissingComponent(&'static str),

    #[error("body is not fully captured")]
    BodyNotAnalyzable,

    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    pub fn invalid_options(error: impl fmt::Display) -> Self {
        TaskError::InvalidOptions(error.to_string())
    }
}

/// A unit of work run against the telemetry tree.
pub trait TaskHandler: Send + Sync {
    /// Name used in configuration and logs.
    fn name(&self) -> &'static str;

    /// Check options once at load time. The default accepts anything.
    fn validate(&self, _options: &Value) -> Result<(), TaskError> {
        Ok(())
    }

    fn execute(
        &self,
        content: &mut AnalyzableContent,
        options: &Value,
        phase: Phase,
    ) -> Result<(), TaskError>;
}

/// A task with its handler resolved and conditions compiled.
pub struct CompiledTask {
    handler: Arc<dyn TaskHandler>,
    options: Value,
    conditions: Vec<ConditionNode>,
}

impl CompiledTask {
    pub fn new(handler: Arc<dyn TaskHandler>, options: Value, conditions: Vec<ConditionNode>) -> Self {
        Self {
            handler,
            options,
            conditions,
        }
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler.name()
    }

    pub fn conditions(&self) -> &[ConditionNode] {
        &self.conditions
    }
}

impl fmt::Debug for CompiledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTask")
            .field("handler", &self.handler.name())
            .field("options", &self.options)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

/// What happened to one task during a phase run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Skipped,
    Succeeded,
    Failed,
    Panicked,
}

/// The compiled task lists of one web service.
#[derive(Debug, Default)]
pub struct PhaseRunner {
    phases: BTreeMap<Phase, Vec<CompiledTask>>,
}

impl PhaseRunner {
    pub fn new(phases: BTreeMap<Phase, Vec<CompiledTask>>) -> Self {
        Self { phases }
    }

    /// A runner with no tasks at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn tasks(&self, phase: Phase) -> &[CompiledTask] {
        self.phases.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn task_count(&self) -> usize {
        self.phases.values().map(Vec::len).sum()
    }

    /// Run every task of `phase` in order.
    pub fn run(&self, phase: Phase, content: &mut AnalyzableContent) -> Vec<TaskOutcome> {
        self.tasks(phase)
            .iter()
            .map(|task| run_task(task, phase, content))
            .collect()
    }
}

fn run_task(task: &CompiledTask, phase: Phase, content: &mut AnalyzableContent) -> TaskOutcome {
    if !evaluate_roots(&task.conditions, content) {
        tracing::trace!(handler = task.handler_name(), %phase, "Task conditions not met");
        return TaskOutcome::Skipped;
    }

    let result = catch_unwind(AssertUnwindSafe(|| {
        task.handler.execute(content, &task.options, phase)
    }));

    match result {
        Ok(Ok(())) => {
            tracing::debug!(handler = task.handler_name(), %phase, "Task executed");
            TaskOutcome::Succeeded
        }
        Ok(Err(e)) => {
            tracing::warn!(
                handler = task.handler_name(),
                %phase,
                exchange_id = %content.id(),
                error = %e,
                "Task failed, continuing"
            );
            metrics::record_task_failure(task.handler_name(), phase.as_str());
            TaskOutcome::Failed
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::warn!(
                handler = task.handler_name(),
                %phase,
                exchange_id = %content.id(),
                panic = %message,
                "Task panicked, continuing"
            );
            metrics::record_task_failure(task.handler_name(), phase.as_str());
            TaskOutcome::Panicked
        }
    }
}
