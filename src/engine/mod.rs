// src/engine/mod.rs

//! Orchestration engine for towerflow.
//!
//! This module ties together:
//! - the template registry and the in-memory job store
//! - one workflow controller per running workflow job
//! - the launch queue for templates that do not allow simultaneous runs
//! - the main runtime event loop that reacts to:
//!   - launch / cancel / approve / deny requests
//!   - job start and completion reports from the launch backend
//!   - approval timeout ticks
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::job::{ExtraVars, JobLaunchConfig, JobStatus, UnifiedJobKind};
use crate::types::JobId;
use crate::workflow::LaunchPrompts;

/// A job the launch backend has to run.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub job_id: JobId,
    pub name: String,
    pub kind: UnifiedJobKind,
    /// Shell command for the process backend; `None` succeeds immediately.
    pub cmd: Option<String>,
    pub config: JobLaunchConfig,
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Exit once no job is active and nothing is queued (used for one-shot
    /// CLI runs).
    pub exit_when_idle: bool,
    /// How often open approval gates are checked for expiry.
    pub approval_check_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            exit_when_idle: false,
            approval_check_interval: Duration::from_secs(1),
        }
    }
}

/// Events flowing into the runtime from callers and the launch backend.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Launch a workflow job from a registered template.
    LaunchWorkflow {
        template: String,
        prompts: LaunchPrompts,
    },
    /// The backend started executing a job.
    JobStarted { job_id: JobId },
    /// The backend finished a job.
    JobFinished {
        job_id: JobId,
        status: JobStatus,
        artifacts: ExtraVars,
    },
    /// Approve the approval job `job_id`.
    Approve { job_id: JobId },
    /// Deny the approval job `job_id`.
    Deny { job_id: JobId },
    /// Cancel any job, workflow jobs included.
    CancelJob { job_id: JobId },
    /// Check approval deadlines.
    ApprovalTick { now: DateTime<Utc> },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod queue;
pub mod runtime;

pub use core::{CoreRuntime, Launched, StandingDecision};
pub use event_handlers::{CoreCommand, CoreStep};
pub use queue::LaunchQueue;
pub use runtime::Runtime;
