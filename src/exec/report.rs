// src/exec/report.rs

//! Shared result accumulator handed to every command task.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::dag::TaskName;
use crate::families::ScanFamily;

/// What one command task produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub task: TaskName,
    pub family: Option<ScanFamily>,
    /// `None` if the process was killed or never reported a code.
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
    pub elapsed: Duration,
}

impl TaskRecord {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Cloneable handle to the records of one run.
///
/// Tasks run concurrently and append through the inner mutex; the engine
/// itself never touches this state.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    records: Arc<Mutex<Vec<TaskRecord>>>,
}

impl ScanReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: TaskRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Records in completion order.
    pub fn records(&self) -> Vec<TaskRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn record_for(&self, task: &str) -> Option<TaskRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.task == task)
            .cloned()
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in self.records() {
            let family = record
                .family
                .map(|fam| format!(" [{fam}]"))
                .unwrap_or_default();
            let code = record
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "killed".to_string());
            writeln!(
                f,
                "  {}{}: exit={} lines={} elapsed={:.2?}",
                record.task,
                family,
                code,
                record.stdout.len(),
                record.elapsed
            )?;
        }
        Ok(())
    }
}
