// src/dag/mod.rs

//! Task definitions and the dependency graph they form.
//!
//! - [`task`] defines the [`Task`] trait consumed by the engine and a
//!   closure-backed [`FnTask`].
//! - [`graph`] validates a task set and computes its topological order.
//! - [`status`] holds the per-task state machine and aggregate counters.

pub mod graph;
pub mod status;
pub mod task;

/// Canonical task identifier used throughout the engine.
pub type TaskName = String;

pub use graph::DagGraph;
pub use status::{RunState, Stats, TaskStatus};
pub use task::{FnTask, Task, TaskFuture, TaskResult};
