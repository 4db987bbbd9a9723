// src/workflow/node_state.rs

//! Per-run state of workflow job nodes.

use crate::job::{ExtraVars, JobStatus};
use crate::types::{EdgeType, JobId};

/// Outcome of a finished node, as far as edge-following is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Success,
    Failure,
}

impl NodeOutcome {
    /// Classify a terminal job status. Non-terminal statuses have no outcome.
    pub fn from_status(status: JobStatus) -> Option<Self> {
        match status {
            JobStatus::Successful => Some(NodeOutcome::Success),
            JobStatus::Failed | JobStatus::Error | JobStatus::Canceled => {
                Some(NodeOutcome::Failure)
            }
            JobStatus::New | JobStatus::Pending | JobStatus::Waiting | JobStatus::Running => None,
        }
    }

    /// Whether an edge of `edge_type` fires for this outcome.
    pub fn fires(self, edge_type: EdgeType) -> bool {
        match edge_type {
            EdgeType::Always => true,
            EdgeType::Success => self == NodeOutcome::Success,
            EdgeType::Failure => self == NodeOutcome::Failure,
        }
    }
}

/// State of one node within a single workflow job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRunState {
    /// Not launched yet; still waiting on parents.
    NotStarted,
    /// A job was launched for this node and has not finished.
    Running,
    /// Approval node waiting for an approve/deny decision.
    AwaitingApproval,
    /// Finished with the given outcome.
    Done(NodeOutcome),
    /// Will never run in this workflow job ("skipped").
    DoNotRun,
}

impl NodeRunState {
    /// Done or do-not-run.
    pub fn is_resolved(self) -> bool {
        matches!(self, NodeRunState::Done(_) | NodeRunState::DoNotRun)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, NodeRunState::Running | NodeRunState::AwaitingApproval)
    }
}

/// How an incoming edge looks from the child's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeState {
    Fired,
    Dead,
    Pending,
}

impl EdgeState {
    pub(crate) fn of(parent: NodeRunState, edge_type: EdgeType) -> Self {
        match parent {
            NodeRunState::Done(outcome) if outcome.fires(edge_type) => EdgeState::Fired,
            NodeRunState::Done(_) | NodeRunState::DoNotRun => EdgeState::Dead,
            NodeRunState::NotStarted | NodeRunState::Running | NodeRunState::AwaitingApproval => {
                EdgeState::Pending
            }
        }
    }
}

/// Bookkeeping for one workflow job node.
#[derive(Debug, Clone)]
pub struct NodeRunInfo {
    pub state: NodeRunState,
    /// Job launched for this node, once bound.
    pub job: Option<JobId>,
    /// Status the node's job finished with.
    pub final_status: Option<JobStatus>,
    /// Artifacts published by this node's own job.
    pub artifacts: ExtraVars,
    /// Artifacts inherited from ancestors at launch time.
    pub ancestor_artifacts: ExtraVars,
    /// Failed without launching because its template is gone.
    pub missing_template: bool,
}

impl NodeRunInfo {
    pub(crate) fn new() -> Self {
        Self {
            state: NodeRunState::NotStarted,
            job: None,
            final_status: None,
            artifacts: ExtraVars::new(),
            ancestor_artifacts: ExtraVars::new(),
            missing_template: false,
        }
    }
}
