// src/job/unified.rs

//! The unified job record shared by every kind of launchable work.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{Result, TowerflowError};
use crate::job::launch_config::{ExtraVars, JobLaunchConfig};
use crate::job::status::JobStatus;
use crate::types::{JobId, LaunchType, NodeId};

/// Kind-specific payload of a unified job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedJobKind {
    Job {
        playbook: String,
    },
    ProjectUpdate {
        scm_branch: Option<String>,
    },
    InventoryUpdate {
        source: String,
    },
    SystemJob {
        job_type: String,
    },
    AdHocCommand {
        module_name: String,
        module_args: String,
    },
    WorkflowJob {
        template: String,
    },
    WorkflowApproval {
        #[serde(skip)]
        timeout: Option<Duration>,
    },
}

impl UnifiedJobKind {
    /// Short type name, matching the API's `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            UnifiedJobKind::Job { .. } => "job",
            UnifiedJobKind::ProjectUpdate { .. } => "project_update",
            UnifiedJobKind::InventoryUpdate { .. } => "inventory_update",
            UnifiedJobKind::SystemJob { .. } => "system_job",
            UnifiedJobKind::AdHocCommand { .. } => "ad_hoc_command",
            UnifiedJobKind::WorkflowJob { .. } => "workflow_job",
            UnifiedJobKind::WorkflowApproval { .. } => "workflow_approval",
        }
    }

    pub fn is_workflow(&self) -> bool {
        matches!(self, UnifiedJobKind::WorkflowJob { .. })
    }

    pub fn is_approval(&self) -> bool {
        matches!(self, UnifiedJobKind::WorkflowApproval { .. })
    }
}

/// Workflow node that spawned a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpawnedBy {
    pub workflow_job: JobId,
    pub node: NodeId,
}

/// A single launchable unit of work and its lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedJob {
    pub id: JobId,
    pub name: String,
    pub kind: UnifiedJobKind,
    pub launch_type: LaunchType,
    pub status: JobStatus,
    pub failed: bool,
    pub cancel_flag: bool,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub job_explanation: String,
    pub artifacts: ExtraVars,
    pub launch_config: JobLaunchConfig,
    pub spawned_by: Option<SpawnedBy>,
    /// Name of the unified job template this job was created from, if any.
    pub template: Option<String>,
}

impl UnifiedJob {
    pub fn new(
        id: JobId,
        name: impl Into<String>,
        kind: UnifiedJobKind,
        launch_type: LaunchType,
        launch_config: JobLaunchConfig,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            launch_type,
            status: JobStatus::New,
            failed: false,
            cancel_flag: false,
            created: Utc::now(),
            started: None,
            finished: None,
            job_explanation: String::new(),
            artifacts: ExtraVars::new(),
            launch_config,
            spawned_by: None,
            template: None,
        }
    }

    /// A job can only be started once, from `new`. Relaunching always creates
    /// a fresh job.
    pub fn can_start(&self) -> bool {
        self.status == JobStatus::New
    }

    pub fn can_cancel(&self) -> bool {
        self.status.can_cancel()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Apply a status transition, enforcing the monotonic transition table.
    ///
    /// On error the job is left untouched.
    pub fn transition_to(&mut self, to: JobStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(TowerflowError::InvalidStateTransition {
                job: self.id,
                from: self.status,
                to,
            });
        }

        if to == JobStatus::Running && self.started.is_none() {
            self.started = Some(now);
        }
        if to.is_terminal() {
            if self.started.is_none() {
                self.started = Some(now);
            }
            self.finished = Some(now);
            self.failed = to.is_failure();
        }
        self.status = to;
        Ok(())
    }

    /// Append to the human-readable explanation of why a job ended up where
    /// it did.
    pub fn explain(&mut self, text: &str) {
        if !self.job_explanation.is_empty() {
            self.job_explanation.push(' ');
        }
        self.job_explanation.push_str(text);
    }
}
