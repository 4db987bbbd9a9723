// src/workflow/controller_step.rs

//! Result type for a single controller evaluation.

use crate::job::{JobLaunchConfig, JobStatus, UnifiedJobKind, UnifiedJobTemplate};
use crate::types::{JobId, NodeId};

/// A node the controller decided to launch.
#[derive(Debug, Clone)]
pub struct NodeLaunch {
    pub node: NodeId,
    pub identifier: String,
    pub template: UnifiedJobTemplate,
    pub kind: UnifiedJobKind,
    pub config: JobLaunchConfig,
}

impl NodeLaunch {
    pub fn is_approval(&self) -> bool {
        self.kind.is_approval()
    }
}

/// Structured result of one controller step.
///
/// Tests use it to step a workflow by hand and assert on what changed.
#[derive(Debug, Clone, Default)]
pub struct ControllerStep {
    /// Nodes that became eligible and must be launched now.
    pub newly_launched: Vec<NodeLaunch>,
    /// Nodes marked do-not-run in this step.
    pub newly_skipped: Vec<NodeId>,
    /// Nodes failed without launching (missing template).
    pub newly_failed: Vec<NodeId>,
    /// Child jobs that have to be canceled.
    pub jobs_to_cancel: Vec<JobId>,
    /// Set in the step in which the workflow job reached its final status.
    pub workflow_finished: Option<JobStatus>,
}

impl ControllerStep {
    pub fn is_empty(&self) -> bool {
        self.newly_launched.is_empty()
            && self.newly_skipped.is_empty()
            && self.newly_failed.is_empty()
            && self.jobs_to_cancel.is_empty()
            && self.workflow_finished.is_none()
    }

    pub fn launched_identifiers(&self) -> Vec<&str> {
        self.newly_launched
            .iter()
            .map(|l| l.identifier.as_str())
            .collect()
    }

    pub fn merge(&mut self, other: ControllerStep) {
        self.newly_launched.extend(other.newly_launched);
        self.newly_skipped.extend(other.newly_skipped);
        self.newly_failed.extend(other.newly_failed);
        self.jobs_to_cancel.extend(other.jobs_to_cancel);
        if other.workflow_finished.is_some() {
            self.workflow_finished = other.workflow_finished;
        }
    }
}
