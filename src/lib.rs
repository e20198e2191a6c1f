// src/lib.rs

//! Dependency-ordered concurrent task execution for scan pipelines.
//!
//! The engine ([`engine::Workflow`]) runs a validated set of [`dag::Task`]s
//! against caller-owned shared state: tasks start as soon as their
//! dependencies finished, run concurrently, and the run stops at the first
//! failure, on cancellation, or when everything is done.
//!
//! The `scanflow` binary drives the engine from a TOML file of shell
//! commands ([`exec::CommandTask`]).

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod families;
pub mod logging;
pub mod types;

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate, parse_duration};
use crate::engine::{RegistrySnapshot, Workflow};
use crate::exec::{CommandTask, ScanReport};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - command tasks + workflow construction
/// - Ctrl-C handling
/// - the run itself and its summary
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config from {:?}", config_path))?;

    let mut options = cfg.run_options();
    if let Some(ref timeout) = args.timeout {
        options.timeout = Some(parse_duration(timeout).map_err(|e| anyhow!("--timeout: {e}"))?);
    }

    let workflow = Workflow::with_options(CommandTask::from_config(&cfg), options)?;

    if args.dry_run {
        print_dry_run(&cfg, &workflow);
        return Ok(());
    }

    let cancel = CancellationToken::new();

    // Ctrl-C → cancel the run; tasks observe the token and kill their processes.
    {
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received; cancelling run");
            token.cancel();
        });
    }

    let report = ScanReport::new();
    let (result, snapshot) = workflow.run_with_snapshot(&cancel, report.clone()).await;

    if result.is_err() {
        // Grace period so tasks observing cancellation can shut down.
        let grace = cfg.settings().shutdown_grace_period;
        if !grace.is_zero() {
            warn!(?grace, "run did not complete cleanly; waiting for in-flight tasks");
            tokio::time::sleep(grace).await;
        }
    }

    print_summary(&snapshot, &report);

    result.context("scan workflow failed")
}

/// Print the validated plan without executing anything.
fn print_dry_run(cfg: &ConfigFile, workflow: &Workflow<ScanReport>) {
    let options = workflow.options();

    println!("scanflow dry-run");
    println!("  config.poll_interval = {:?}", options.poll_interval);
    println!("  config.dependency_gating = {:?}", options.gating);
    if let Some(timeout) = options.timeout {
        println!("  config.timeout = {:?}", timeout);
    }
    println!(
        "  config.shutdown_grace_period = {:?}",
        cfg.settings().shutdown_grace_period
    );
    println!();

    println!("execution order ({}):", workflow.len());
    for (idx, name) in workflow.order().iter().enumerate() {
        println!("  {}. {name}", idx + 1);
        if let Some(task) = cfg.task.get(name) {
            println!("      cmd: {}", task.cmd);
            if let Some(family) = task.family {
                println!("      family: {family}");
            }
        }
        let deps = cfg.dependencies_of(name);
        if !deps.is_empty() {
            println!("      after: {:?}", deps);
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_summary(snapshot: &RegistrySnapshot, report: &ScanReport) {
    println!("scanflow summary: {}", snapshot.stats);
    print!("{report}");
    for task in &snapshot.tasks {
        if let Some(err) = &task.error {
            println!("  {} failed: {:#}", task.name, err);
        } else if !task.state.is_terminal() {
            println!("  {}: {}", task.name, task.state);
        }
    }
}
