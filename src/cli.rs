// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `towerflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "towerflow",
    version,
    about = "Run a workflow of jobs linked by success, failure and always edges.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow definition (TOML).
    ///
    /// Default: `Towerflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Towerflow.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TOWERFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the workflow graph, but don't launch anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Extra variables for this launch, as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub extra_vars: Option<String>,

    /// Inventory prompt for this launch.
    #[arg(long, value_name = "NAME")]
    pub inventory: Option<String>,

    /// Limit prompt for this launch.
    #[arg(long, value_name = "PATTERN")]
    pub limit: Option<String>,

    /// SCM branch prompt for this launch.
    #[arg(long, value_name = "BRANCH")]
    pub scm_branch: Option<String>,

    /// Approve the approval node NODE as soon as it is reached. Repeatable.
    #[arg(long = "approve", value_name = "NODE")]
    pub approve: Vec<String>,

    /// Deny the approval node NODE as soon as it is reached. Repeatable.
    #[arg(long = "deny", value_name = "NODE")]
    pub deny: Vec<String>,
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
