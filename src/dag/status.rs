// src/dag/status.rs

//! Per-task execution state and aggregate counters.

use std::fmt;
use std::sync::Arc;

/// Lifecycle of a task within one run.
///
/// `Pending -> Running -> {Done | Failed}`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Waiting for admission.
    Pending,
    /// Admitted; the body is executing.
    Running,
    /// Body returned `Ok`.
    Done,
    /// Body returned an error (or panicked).
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Whether moving from `self` to `next` respects the state machine.
    /// Re-entering the current state is allowed.
    pub fn can_transition_to(self, next: RunState) -> bool {
        match (self, next) {
            (a, b) if a == b => true,
            (RunState::Pending, _) => true,
            (RunState::Running, RunState::Done | RunState::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Current status of one task, including the error of a failed body.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub state: RunState,
    pub error: Option<Arc<anyhow::Error>>,
}

impl TaskStatus {
    pub fn pending() -> Self {
        Self {
            state: RunState::Pending,
            error: None,
        }
    }

    pub fn running() -> Self {
        Self {
            state: RunState::Running,
            error: None,
        }
    }

    pub fn done() -> Self {
        Self {
            state: RunState::Done,
            error: None,
        }
    }

    pub fn failed(error: anyhow::Error) -> Self {
        Self {
            state: RunState::Failed,
            error: Some(Arc::new(error)),
        }
    }
}

/// Aggregate counters, folded incrementally on every transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl Stats {
    pub fn seeded(pending: usize) -> Self {
        Self {
            pending,
            ..Self::default()
        }
    }

    /// Move one task from `from` to `to`.
    pub fn apply(&mut self, from: RunState, to: RunState) {
        if from == to {
            return;
        }
        let left = self.slot(from);
        *left = left.saturating_sub(1);
        *self.slot(to) += 1;
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.done + self.failed
    }

    /// No work left in flight or waiting.
    pub fn drained(&self) -> bool {
        self.pending + self.running == 0
    }

    fn slot(&mut self, state: RunState) -> &mut usize {
        match state {
            RunState::Pending => &mut self.pending,
            RunState::Running => &mut self.running,
            RunState::Done => &mut self.done,
            RunState::Failed => &mut self.failed,
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending={} running={} done={} failed={}",
            self.pending, self.running, self.done, self.failed
        )
    }
}
