// src/workflow/approval.rs

//! Approval gates: manual approve/deny decision points with an optional
//! timeout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::errors::{Result, TowerflowError};
use crate::job::JobStatus;
use crate::types::{JobId, NodeId};

/// How a gate was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
    /// Denied automatically after the timeout elapsed.
    TimedOut,
    /// Closed because the workflow job was canceled.
    Canceled,
}

impl ApprovalDecision {
    /// Terminal status for the approval job.
    pub fn job_status(self) -> JobStatus {
        match self {
            ApprovalDecision::Approved => JobStatus::Successful,
            ApprovalDecision::Denied | ApprovalDecision::TimedOut => JobStatus::Failed,
            ApprovalDecision::Canceled => JobStatus::Canceled,
        }
    }
}

/// One open (or already resolved) approval.
#[derive(Debug, Clone)]
pub struct ApprovalGate {
    pub node: NodeId,
    pub identifier: String,
    pub job: JobId,
    pub opened_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    decision: Option<ApprovalDecision>,
}

/// Outcome of resolving a gate; the caller finishes the approval job with
/// `status` and feeds it back to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalResolution {
    pub node: NodeId,
    pub job: JobId,
    pub decision: ApprovalDecision,
    pub status: JobStatus,
}

impl ApprovalGate {
    /// Open a gate. A zero or absent timeout means the gate never expires,
    /// as does one whose deadline would fall outside the calendar range.
    pub fn open(
        node: NodeId,
        identifier: impl Into<String>,
        job: JobId,
        opened_at: DateTime<Utc>,
        timeout: Option<Duration>,
    ) -> Self {
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .and_then(|t| opened_at.checked_add_signed(t));

        Self {
            node,
            identifier: identifier.into(),
            job,
            opened_at,
            deadline,
            decision: None,
        }
    }

    pub fn decision(&self) -> Option<ApprovalDecision> {
        self.decision
    }

    pub fn is_open(&self) -> bool {
        self.decision.is_none()
    }

    pub fn approve(&mut self) -> Result<ApprovalResolution> {
        self.decide(ApprovalDecision::Approved)
    }

    pub fn deny(&mut self) -> Result<ApprovalResolution> {
        self.decide(ApprovalDecision::Denied)
    }

    pub fn cancel(&mut self) -> Result<ApprovalResolution> {
        self.decide(ApprovalDecision::Canceled)
    }

    /// Deny the gate if its deadline has passed. Returns `None` when the gate
    /// is still within its window (or already resolved).
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<ApprovalResolution> {
        match self.deadline {
            Some(deadline) if self.is_open() && now >= deadline => {
                self.decide(ApprovalDecision::TimedOut).ok()
            }
            _ => None,
        }
    }

    /// First decision wins; every later one fails with `AlreadyActioned`.
    fn decide(&mut self, decision: ApprovalDecision) -> Result<ApprovalResolution> {
        if self.decision.is_some() {
            return Err(TowerflowError::AlreadyActioned(self.identifier.clone()));
        }

        self.decision = Some(decision);
        info!(
            node = %self.identifier,
            job_id = %self.job,
            ?decision,
            "approval gate resolved"
        );

        Ok(ApprovalResolution {
            node: self.node,
            job: self.job,
            decision,
            status: decision.job_status(),
        })
    }
}
