// src/job/mod.rs

//! Unified job lifecycle.
//!
//! - [`status`] defines the status enum and its monotonic transition table.
//! - [`unified`] holds the job record and its kind-specific payload.
//! - [`launch_config`] has node prompt overrides and the resolved launch
//!   configuration attached to a job.
//! - [`store`] owns all jobs and applies cancel/delete rules.
//! - [`template`] describes the unified job templates jobs are spawned from.

pub mod launch_config;
pub mod status;
pub mod store;
pub mod template;
pub mod unified;

pub use launch_config::{ExtraVars, JobLaunchConfig, LaunchOverrides};
pub use status::{JobStatus, ACTIVE_STATES, CAN_CANCEL};
pub use store::{CancelOutcome, JobStore};
pub use template::{TemplateKind, UnifiedJobTemplate};
pub use unified::{SpawnedBy, UnifiedJob, UnifiedJobKind};
