// src/job/status.rs

//! Unified job status and its monotonic transition table.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Status of any unified job.
///
/// ```text
/// new -> pending -> waiting -> running -> successful | failed | error | canceled
/// ```
///
/// Transitions only ever move forward in rank; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, but not started.
    New,
    /// Queued, not yet running.
    Pending,
    /// Waiting on a dependency or on capacity.
    Waiting,
    /// Currently running.
    Running,
    /// Completed successfully.
    Successful,
    /// Completed, but with failures.
    Failed,
    /// Unable to run.
    Error,
    /// Canceled before completion.
    Canceled,
}

/// Statuses that block deletion of a job (and of the jobs it spawned).
pub const ACTIVE_STATES: [JobStatus; 3] =
    [JobStatus::Pending, JobStatus::Waiting, JobStatus::Running];

/// Statuses from which a cancel request is accepted.
pub const CAN_CANCEL: [JobStatus; 4] = [
    JobStatus::New,
    JobStatus::Pending,
    JobStatus::Waiting,
    JobStatus::Running,
];

impl JobStatus {
    /// Position in the lifecycle; every terminal status shares the top rank.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::New => 0,
            JobStatus::Pending => 1,
            JobStatus::Waiting => 2,
            JobStatus::Running => 3,
            JobStatus::Successful
            | JobStatus::Failed
            | JobStatus::Error
            | JobStatus::Canceled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 4
    }

    pub fn is_active(self) -> bool {
        ACTIVE_STATES.contains(&self)
    }

    pub fn can_cancel(self) -> bool {
        CAN_CANCEL.contains(&self)
    }

    /// Whether a job in this status has "failed" for reporting purposes.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Error | JobStatus::Canceled
        )
    }

    /// Whether moving from `self` to `to` is allowed.
    ///
    /// Only strictly forward moves are valid, so `successful -> canceled`,
    /// `canceled -> successful` and `running -> new` are all rejected.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        !self.is_terminal() && to.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Pending => "pending",
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(JobStatus::New),
            "pending" => Ok(JobStatus::Pending),
            "waiting" => Ok(JobStatus::Waiting),
            "running" => Ok(JobStatus::Running),
            "successful" => Ok(JobStatus::Successful),
            "failed" => Ok(JobStatus::Failed),
            "error" => Ok(JobStatus::Error),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(format!("invalid job status: {other}")),
        }
    }
}
