// src/errors.rs

//! Crate-wide error type and helpers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::dag::RunState;
use crate::dag::TaskName;

#[derive(Error, Debug)]
pub enum ScanflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskName),

    #[error("task '{task}' has unknown dependency '{dependency}'")]
    UnknownDependency { task: TaskName, dependency: TaskName },

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    /// Lookup of an id the registry was never seeded with.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskName),

    #[error("Invalid state transition for task '{task}': {from:?} -> {to:?}")]
    InvalidTransition {
        task: TaskName,
        from: RunState,
        to: RunState,
    },

    #[error("workflow run cancelled")]
    Cancelled,

    #[error("workflow run exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("{0}")]
    TasksFailed(TaskFailures),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScanflowError {
    /// Errors raised while building a workflow, before anything runs.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            ScanflowError::DuplicateTask(_)
                | ScanflowError::UnknownDependency { .. }
                | ScanflowError::DagCycle(_)
        )
    }

    /// The run stopped because the caller cancelled it or its deadline passed.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ScanflowError::Cancelled | ScanflowError::DeadlineExceeded(_)
        )
    }

    /// Per-task failures, if this is a joined task error.
    pub fn task_failures(&self) -> Option<&TaskFailures> {
        match self {
            ScanflowError::TasksFailed(failures) => Some(failures),
            _ => None,
        }
    }
}

/// Error recorded against a single task.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task: TaskName,
    pub error: Arc<anyhow::Error>,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task '{}' failed: {:#}", self.task, self.error)
    }
}

/// Every task error of one run, joined in topological order.
#[derive(Debug, Clone, Default)]
pub struct TaskFailures(pub Vec<TaskFailure>);

impl TaskFailures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskFailure> {
        self.0.iter()
    }

    pub fn contains_task(&self, task: &str) -> bool {
        self.0.iter().any(|f| f.task == task)
    }
}

impl fmt::Display for TaskFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ScanflowError>;
