// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `scanflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scanflow",
    version,
    about = "Run dependency-ordered scan tasks concurrently.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Scanflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Scanflow.toml")]
    pub config: String,

    /// Override `[config].timeout` for this run (e.g. "90s", "30m").
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SCANFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the execution plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["scanflow"]).unwrap();
        assert_eq!(args.config, "Scanflow.toml");
        assert!(!args.dry_run);
        assert!(args.timeout.is_none());
    }

    #[test]
    fn all_flags() {
        let args = CliArgs::try_parse_from([
            "scanflow",
            "--config",
            "scan/plan.toml",
            "--timeout",
            "90s",
            "--log-level",
            "debug",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.config, "scan/plan.toml");
        assert_eq!(args.timeout.as_deref(), Some("90s"));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(args.dry_run);
    }
}
