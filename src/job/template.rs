// src/job/template.rs

//! Unified job templates: the launchable things a workflow node points at.

use std::time::Duration;

use serde::Serialize;

use crate::job::launch_config::LaunchOverrides;
use crate::job::unified::UnifiedJobKind;

/// Kind of a unified job template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateKind {
    JobTemplate {
        playbook: String,
    },
    Project {
        scm_branch: Option<String>,
    },
    InventorySource {
        source: String,
    },
    SystemJobTemplate {
        job_type: String,
    },
    /// Runs another workflow job template as a nested workflow job.
    WorkflowJobTemplate {
        workflow: String,
    },
    /// Manual approve/deny gate. `None` timeout falls back to the engine
    /// default.
    Approval {
        #[serde(skip)]
        timeout: Option<Duration>,
    },
}

/// A template a workflow node can launch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedJobTemplate {
    pub name: String,
    pub kind: TemplateKind,
    /// Shell command run by the process launch backend.
    pub cmd: Option<String>,
}

impl UnifiedJobTemplate {
    pub fn new(name: impl Into<String>, kind: TemplateKind) -> Self {
        Self {
            name: name.into(),
            kind,
            cmd: None,
        }
    }

    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    pub fn is_approval(&self) -> bool {
        matches!(self.kind, TemplateKind::Approval { .. })
    }

    /// Name of the workflow template this template launches, if it is one.
    pub fn nested_workflow(&self) -> Option<&str> {
        match &self.kind {
            TemplateKind::WorkflowJobTemplate { workflow } => Some(workflow),
            _ => None,
        }
    }

    /// Build the payload for a new job spawned from this template.
    ///
    /// Node overrides that change what runs (`scm_branch`, `job_type`) are
    /// folded in here.
    pub fn job_kind(&self, overrides: &LaunchOverrides) -> UnifiedJobKind {
        match &self.kind {
            TemplateKind::JobTemplate { playbook } => UnifiedJobKind::Job {
                playbook: playbook.clone(),
            },
            TemplateKind::Project { scm_branch } => UnifiedJobKind::ProjectUpdate {
                scm_branch: overrides.scm_branch.clone().or_else(|| scm_branch.clone()),
            },
            TemplateKind::InventorySource { source } => UnifiedJobKind::InventoryUpdate {
                source: source.clone(),
            },
            TemplateKind::SystemJobTemplate { job_type } => UnifiedJobKind::SystemJob {
                job_type: overrides.job_type.clone().unwrap_or_else(|| job_type.clone()),
            },
            TemplateKind::WorkflowJobTemplate { workflow } => UnifiedJobKind::WorkflowJob {
                template: workflow.clone(),
            },
            TemplateKind::Approval { timeout } => UnifiedJobKind::WorkflowApproval {
                timeout: *timeout,
            },
        }
    }
}
