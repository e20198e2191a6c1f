// src/config/validate.rs

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, ConfigSection, EngineSettings, RawConfigFile};
use crate::dag::{DagGraph, TaskName};
use crate::engine::RunOptions;
use crate::errors::{Result, ScanflowError};
use crate::families::{ScanFamily, implicit_dependencies};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ScanflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        let settings = validate_global_config(&raw.config)?;
        ensure_unique_families(&raw)?;
        let dependencies = resolve_dependencies(&raw);
        validate_dag(&dependencies)?;
        Ok(ConfigFile::new_unchecked(
            raw.config,
            raw.task,
            settings,
            dependencies,
        ))
    }
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(ScanflowError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(section: &ConfigSection) -> Result<EngineSettings> {
    // dependency_gating is strongly typed and validated during
    // deserialization.
    let poll_interval = duration_field("poll_interval", &section.poll_interval)?;
    if poll_interval.is_zero() {
        return Err(ScanflowError::ConfigError(
            "[config].poll_interval must be greater than zero".to_string(),
        ));
    }

    let timeout = section
        .timeout
        .as_deref()
        .map(|t| duration_field("timeout", t))
        .transpose()?;

    let shutdown_grace_period =
        duration_field("shutdown_grace_period", &section.shutdown_grace_period)?;

    let mut run = RunOptions::default()
        .with_poll_interval(poll_interval)
        .with_gating(section.dependency_gating)
        .with_cancel_in_flight_on_exit(section.cancel_in_flight_on_exit);
    run.timeout = timeout;

    Ok(EngineSettings {
        run,
        shutdown_grace_period,
    })
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| ScanflowError::ConfigError(format!("[config].{field}: {e}")))
}

fn ensure_unique_families(cfg: &RawConfigFile) -> Result<()> {
    let mut seen: BTreeMap<ScanFamily, &str> = BTreeMap::new();
    for (name, task) in cfg.task.iter() {
        if let Some(family) = task.family {
            if let Some(previous) = seen.insert(family, name.as_str()) {
                return Err(ScanflowError::ConfigError(format!(
                    "family '{}' is assigned to both task '{}' and task '{}'",
                    family, previous, name
                )));
            }
        }
    }
    Ok(())
}

/// Merge explicit `after` lists with implicit family edges.
fn resolve_dependencies(cfg: &RawConfigFile) -> BTreeMap<TaskName, Vec<TaskName>> {
    let implicit = implicit_dependencies(
        cfg.task
            .iter()
            .filter_map(|(name, task)| task.family.map(|f| (name.as_str(), f))),
    );

    cfg.task
        .iter()
        .map(|(name, task)| {
            let mut deps = task.after.clone();
            for dep in implicit.get(name).into_iter().flatten() {
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
            (name.clone(), deps)
        })
        .collect()
}

fn validate_dag(dependencies: &BTreeMap<TaskName, Vec<TaskName>>) -> Result<()> {
    // Same checks the engine performs when the workflow is built, surfaced
    // at load time so `--dry-run` reports them too.
    DagGraph::build(
        dependencies
            .iter()
            .map(|(name, deps)| (name.clone(), deps.clone())),
    )?;
    Ok(())
}
