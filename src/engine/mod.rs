// src/engine/mod.rs

//! Workflow execution engine.
//!
//! - [`registry`] is the per-run status store and admission control.
//! - [`runtime`] holds [`Workflow`], which validates a task set once and
//!   drives any number of independent runs over it.

use std::time::Duration;

use crate::types::DependencyGating;

pub mod registry;
pub mod runtime;

pub use registry::{DispatchOutcome, Registry, RegistrySnapshot, TaskSnapshot};
pub use runtime::Workflow;

/// How often the scheduler loop re-checks the registry when no wake-up
/// arrives.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lower bound applied to [`RunOptions::poll_interval`]; shorter intervals
/// (including zero) are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Per-workflow execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Upper bound on how long the loop sleeps between registry checks.
    /// Never shorter than [`MIN_POLL_INTERVAL`] in effect.
    pub poll_interval: Duration,
    /// Which dependency outcomes admit a dependent task.
    pub gating: DependencyGating,
    /// Deadline applied by [`Workflow::run`], measured from the start of
    /// the run.
    pub timeout: Option<Duration>,
    /// Cancel the token handed to task bodies whenever the loop exits, not
    /// only on deadline or caller cancellation.
    pub cancel_in_flight_on_exit: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            gating: DependencyGating::default(),
            timeout: None,
            cancel_in_flight_on_exit: false,
        }
    }
}

impl RunOptions {
    pub fn with_gating(mut self, gating: DependencyGating) -> Self {
        self.gating = gating;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Values below [`MIN_POLL_INTERVAL`] are clamped up to it.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Poll interval the scheduler loop actually sleeps for.
    pub(crate) fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }

    pub fn with_cancel_in_flight_on_exit(mut self, cancel: bool) -> Self {
        self.cancel_in_flight_on_exit = cancel;
        self
    }
}
