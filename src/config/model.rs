// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::TaskName;
use crate::engine::RunOptions;
use crate::families::ScanFamily;
use crate::types::DependencyGating;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// poll_interval = "100ms"
/// dependency_gating = "success"
/// timeout = "30m"
///
/// [task.sbom]
/// cmd = "syft dir:/mnt/snapshot -o cyclonedx-json"
/// family = "sbom"
///
/// [task.grype]
/// cmd = "grype sbom:sbom.json"
/// family = "vulnerabilities"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Engine behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<TaskName, TaskConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Upper bound between registry checks when no task completes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// `"success"` (default) or `"terminal"`.
    #[serde(default)]
    pub dependency_gating: DependencyGating,

    /// Optional deadline for the whole run (e.g. `"30m"`).
    #[serde(default)]
    pub timeout: Option<String>,

    /// How long to wait after a cancelled or failed run so tasks observing
    /// cancellation can clean up.
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period: String,

    /// Cancel the token handed to still-running tasks when the run ends.
    #[serde(default)]
    pub cancel_in_flight_on_exit: bool,
}

fn default_poll_interval() -> String {
    "100ms".to_string()
}

fn default_shutdown_grace_period() -> String {
    "2s".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            dependency_gating: DependencyGating::default(),
            timeout: None,
            shutdown_grace_period: default_shutdown_grace_period(),
            cancel_in_flight_on_exit: false,
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Shell command to execute.
    pub cmd: String,

    /// Explicit dependencies: this task waits for every task listed here.
    #[serde(default)]
    pub after: Vec<TaskName>,

    /// Scan family this task implements, if any. Family tags add implicit
    /// ordering (see [`crate::families`]).
    #[serde(default)]
    pub family: Option<ScanFamily>,
}

/// Engine settings parsed out of `[config]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub run: RunOptions,
    pub shutdown_grace_period: Duration,
}

/// A validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)` (or
/// [`crate::config::load_and_validate`]), so holding one means the task
/// graph is acyclic and every duration parsed.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub task: BTreeMap<TaskName, TaskConfig>,
    settings: EngineSettings,
    /// Explicit `after` entries plus implicit family edges.
    dependencies: BTreeMap<TaskName, Vec<TaskName>>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        task: BTreeMap<TaskName, TaskConfig>,
        settings: EngineSettings,
        dependencies: BTreeMap<TaskName, Vec<TaskName>>,
    ) -> Self {
        Self {
            config,
            task,
            settings,
            dependencies,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn run_options(&self) -> RunOptions {
        self.settings.run
    }

    /// Every dependency of `name`, explicit and implicit.
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.dependencies
            .get(name)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }
}
