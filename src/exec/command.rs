// src/exec/command.rs

//! Shell-command task bodies.

use std::process::Stdio;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::dag::{Task, TaskFuture, TaskName, TaskResult};
use crate::exec::report::{ScanReport, TaskRecord};
use crate::families::ScanFamily;

/// A task that runs one shell command and records its output in a
/// [`ScanReport`].
///
/// A non-zero exit status fails the task. On cancellation the child process
/// is killed and the task fails with a cancellation error.
#[derive(Debug, Clone)]
pub struct CommandTask {
    name: TaskName,
    cmd: String,
    deps: Vec<TaskName>,
    family: Option<ScanFamily>,
}

impl CommandTask {
    pub fn new(name: impl Into<TaskName>, cmd: impl Into<String>, deps: Vec<TaskName>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            deps,
            family: None,
        }
    }

    pub fn with_family(mut self, family: ScanFamily) -> Self {
        self.family = Some(family);
        self
    }

    /// One task per `[task.<name>]`, with explicit and implicit dependencies.
    pub fn from_config(cfg: &ConfigFile) -> Vec<CommandTask> {
        cfg.task
            .iter()
            .map(|(name, tc)| CommandTask {
                name: name.clone(),
                cmd: tc.cmd.clone(),
                deps: cfg.dependencies_of(name).to_vec(),
                family: tc.family,
            })
            .collect()
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn family(&self) -> Option<ScanFamily> {
        self.family
    }
}

impl Task<ScanReport> for CommandTask {
    fn id(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[TaskName] {
        &self.deps
    }

    fn run(&self, cancel: CancellationToken, report: ScanReport) -> TaskFuture<'_> {
        Box::pin(run_command(self, cancel, report))
    }
}

/// Build a shell command appropriate for the platform.
fn shell_command(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

async fn run_command(
    task: &CommandTask,
    cancel: CancellationToken,
    report: ScanReport,
) -> TaskResult {
    info!(task = %task.name, cmd = %task.cmd, "starting task process");

    let mut cmd = shell_command(&task.cmd);
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.name))?;

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let task_name = task.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, "stderr: {}", line);
            }
        });
    }

    let stdout_reader = child.stdout.take().map(|stdout| {
        let task_name = task.name.clone();
        tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, "stdout: {}", line);
                collected.push(line);
            }
            collected
        })
    });

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res.with_context(|| {
                format!("waiting for process of task '{}'", task.name)
            })?;

            // Background children of the shell can keep stdout open after
            // the shell itself exited, so draining must stay cancellable.
            let stdout = match stdout_reader {
                Some(mut handle) => tokio::select! {
                    joined = &mut handle => match joined {
                        Ok(lines) => lines,
                        Err(e) => {
                            warn!(task = %task.name, error = %e, "stdout reader did not complete");
                            Vec::new()
                        }
                    },
                    _ = cancel.cancelled() => {
                        info!(task = %task.name, "cancellation requested while draining stdout");
                        handle.abort();
                        report.push(TaskRecord {
                            task: task.name.clone(),
                            family: task.family,
                            exit_code: status.code(),
                            stdout: Vec::new(),
                            elapsed: started.elapsed(),
                        });
                        return Err(anyhow!("task '{}' cancelled", task.name));
                    }
                },
                None => Vec::new(),
            };
            let exit_code = status.code();

            info!(
                task = %task.name,
                exit_code = exit_code.unwrap_or(-1),
                success = status.success(),
                "task process exited"
            );

            report.push(TaskRecord {
                task: task.name.clone(),
                family: task.family,
                exit_code,
                stdout,
                elapsed: started.elapsed(),
            });

            if status.success() {
                Ok(())
            } else {
                Err(anyhow!(
                    "command `{}` exited with status {}",
                    task.cmd,
                    exit_code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
                ))
            }
        }

        _ = cancel.cancelled() => {
            info!(task = %task.name, "cancellation requested; killing process");
            if let Err(e) = child.kill().await {
                warn!(
                    task = %task.name,
                    error = %e,
                    "failed to kill child process on cancellation"
                );
            }

            // Grandchildren of the shell may still hold the pipe open.
            if let Some(handle) = stdout_reader {
                handle.abort();
            }

            report.push(TaskRecord {
                task: task.name.clone(),
                family: task.family,
                exit_code: None,
                stdout: Vec::new(),
                elapsed: started.elapsed(),
            });

            Err(anyhow!("task '{}' cancelled", task.name))
        }
    }
}
