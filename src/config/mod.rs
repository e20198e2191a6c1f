// src/config/mod.rs

//! Configuration loading and validation for the `scanflow` binary.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it into a runnable plan (`validate.rs`), including duration
//!   strings (`duration.rs`) and the task graph.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, ConfigSection, EngineSettings, RawConfigFile, TaskConfig};
