#![allow(dead_code)]

use std::collections::BTreeMap;

use scanflow::config::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig};
use scanflow::errors::Result;
use scanflow::families::ScanFamily;
use scanflow::types::DependencyGating;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_poll_interval(mut self, interval: &str) -> Self {
        self.config.config.poll_interval = interval.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: &str) -> Self {
        self.config.config.timeout = Some(timeout.to_string());
        self
    }

    pub fn with_gating(mut self, gating: DependencyGating) -> Self {
        self.config.config.dependency_gating = gating;
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace: &str) -> Self {
        self.config.config.shutdown_grace_period = grace.to_string();
        self
    }

    /// Raw form, for tests that exercise validation failures.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                after: vec![],
                family: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn family(mut self, family: ScanFamily) -> Self {
        self.task.family = Some(family);
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
