// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawConfigFile, WorkflowDefinition};
use crate::errors::Result;

/// Load a definition file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** check node
/// references or graph shape. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a definition from path and build the validated workflow.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown template and child references,
///   - cycles,
///   - edge rules (mutual exclusion, parent policy),
///   - engine setting sanity.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowDefinition> {
    let raw_config = load_from_path(&path)?;
    let definition = WorkflowDefinition::try_from(raw_config)?;
    Ok(definition)
}

/// Definition file used when `--config` is not given.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Towerflow.toml")
}
