// src/config/mod.rs

//! Workflow definition loading and validation for towerflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a definition file from disk (`loader.rs`).
//! - Validate references and graph shape and build the template (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{parse_duration, EngineConfig, RawConfigFile, WorkflowDefinition};
