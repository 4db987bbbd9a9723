// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::job::JobStatus;
use crate::types::JobId;

#[derive(Error, Debug)]
pub enum TowerflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate node identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid edge type: {0}")]
    InvalidEdgeType(String),

    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    #[error("Invalid state transition for job {job}: {from} -> {to}")]
    InvalidStateTransition {
        job: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Approval node '{0}' has already been actioned")]
    AlreadyActioned(String),

    #[error("Cannot delete job {job}: {reason}")]
    DeleteRefused { job: JobId, reason: String },

    #[error("Workflows are disabled")]
    WorkflowsDisabled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TowerflowError>;
