// src/exec/mod.rs

//! Process execution layer.
//!
//! Wraps external scanner commands as workflow tasks:
//!
//! - [`command`] provides [`CommandTask`], which runs a shell command with
//!   `tokio::process::Command` and honours the task's cancellation token.
//! - [`report`] provides [`ScanReport`], the shared state every command task
//!   appends its outcome to.

pub mod command;
pub mod report;

pub use command::CommandTask;
pub use report::{ScanReport, TaskRecord};
