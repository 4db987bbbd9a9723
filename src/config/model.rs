// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::graph::{GraphPolicy, ParentPolicy};
use crate::job::{ExtraVars, LaunchOverrides};
use crate::workflow::{PromptFlags, WorkflowJobTemplate};

/// Top-level workflow definition as read from a TOML file.
///
/// ```toml
/// [config]
/// workflows_enabled = true
/// approval_default_timeout = "10m"
///
/// [workflow]
/// name = "deploy"
/// extra_vars = { env = "staging" }
///
/// [template.build]
/// kind = "job_template"
/// playbook = "build.yml"
/// cmd = "make build"
///
/// [node.build]
/// template = "build"
/// success = ["test"]
/// ```
///
/// Only `[workflow]` and at least one `[node.<id>]` are required.
///
/// Further workflow templates, launched by nodes whose template has
/// `kind = "workflow_job_template"`, live under `[subworkflow.<name>]` with
/// their nodes in `[subworkflow.<name>.node.<id>]`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: RawEngineSection,

    pub workflow: WorkflowSection,

    /// Unified job templates from `[template.<name>]`.
    #[serde(default)]
    pub template: BTreeMap<String, TemplateSection>,

    /// Workflow nodes from `[node.<identifier>]`.
    #[serde(default)]
    pub node: BTreeMap<String, NodeSection>,

    /// Nested workflow templates from `[subworkflow.<name>]`.
    #[serde(default)]
    pub subworkflow: BTreeMap<String, SubworkflowSection>,
}

/// `[config]` section, engine-wide switches.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEngineSection {
    #[serde(default = "default_true")]
    pub workflows_enabled: bool,

    #[serde(default)]
    pub max_nodes_per_workflow: Option<usize>,

    /// Duration string such as `"30m"`; `"0s"` or absent disables the
    /// timeout for approvals that do not set their own.
    #[serde(default)]
    pub approval_default_timeout: Option<String>,

    /// Let a node be attached under more than one parent (convergence).
    #[serde(default)]
    pub allow_multiple_parents: bool,

    #[serde(default = "default_check_interval")]
    pub approval_check_interval: String,
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> String {
    "1s".to_string()
}

impl Default for RawEngineSection {
    fn default() -> Self {
        Self {
            workflows_enabled: true,
            max_nodes_per_workflow: None,
            approval_default_timeout: None,
            allow_multiple_parents: false,
            approval_check_interval: default_check_interval(),
        }
    }
}

/// `[workflow]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSection {
    pub name: String,

    #[serde(default)]
    pub organization: Option<String>,

    #[serde(default)]
    pub extra_vars: ExtraVars,

    /// Survey definition, `{ spec = [{ variable = "x", required = true }] }`.
    #[serde(default)]
    pub survey_spec: Option<Value>,

    #[serde(default)]
    pub allow_simultaneous: bool,

    #[serde(flatten)]
    pub prompts: PromptFlags,
}

/// `[subworkflow.<name>]` section: a workflow template other nodes can run.
#[derive(Debug, Clone, Deserialize)]
pub struct SubworkflowSection {
    #[serde(default)]
    pub organization: Option<String>,

    #[serde(default)]
    pub extra_vars: ExtraVars,

    #[serde(default)]
    pub survey_spec: Option<Value>,

    #[serde(default)]
    pub allow_simultaneous: bool,

    #[serde(default)]
    pub node: BTreeMap<String, NodeSection>,

    #[serde(flatten)]
    pub prompts: PromptFlags,
}

impl SubworkflowSection {
    /// The workflow-level settings, named `name`.
    pub fn settings(&self, name: &str) -> WorkflowSection {
        WorkflowSection {
            name: name.to_string(),
            organization: self.organization.clone(),
            extra_vars: self.extra_vars.clone(),
            survey_spec: self.survey_spec.clone(),
            allow_simultaneous: self.allow_simultaneous,
            prompts: self.prompts,
        }
    }
}

/// `[template.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSection {
    /// `job_template`, `project`, `inventory_source`, `system_job_template`,
    /// `workflow_job_template` or `approval`.
    pub kind: String,

    /// Subworkflow run by a `workflow_job_template`.
    #[serde(default)]
    pub workflow: Option<String>,

    #[serde(default)]
    pub playbook: Option<String>,

    #[serde(default)]
    pub scm_branch: Option<String>,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub job_type: Option<String>,

    /// Approval timeout as a duration string.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Shell command the process backend runs for jobs of this template.
    #[serde(default)]
    pub cmd: Option<String>,
}

/// `[node.<identifier>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    /// Name of a `[template.<name>]`. Leaving it out models a node whose
    /// template was deleted; such a node fails when reached.
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub success: Vec<String>,

    #[serde(default)]
    pub failure: Vec<String>,

    #[serde(default)]
    pub always: Vec<String>,

    #[serde(default)]
    pub all_parents_must_converge: bool,

    #[serde(flatten)]
    pub overrides: LaunchOverrides,
}

/// Validated engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub workflows_enabled: bool,
    pub max_nodes_per_workflow: Option<usize>,
    pub approval_default_timeout: Option<Duration>,
    pub allow_multiple_parents: bool,
    pub approval_check_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workflows_enabled: true,
            max_nodes_per_workflow: None,
            approval_default_timeout: None,
            allow_multiple_parents: false,
            approval_check_interval: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Graph limits every workflow template is built with.
    pub fn graph_policy(&self) -> GraphPolicy {
        GraphPolicy {
            max_nodes: self.max_nodes_per_workflow,
            parents: if self.allow_multiple_parents {
                ParentPolicy::Multiple
            } else {
                ParentPolicy::Single
            },
        }
    }
}

/// A validated definition: engine settings plus the fully built workflow
/// template that gets launched and the nested templates it may run.
///
/// Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub engine: EngineConfig,
    pub workflow: WorkflowJobTemplate,
    pub subworkflows: Vec<WorkflowJobTemplate>,
}

impl WorkflowDefinition {
    pub(crate) fn new_unchecked(
        engine: EngineConfig,
        workflow: WorkflowJobTemplate,
        subworkflows: Vec<WorkflowJobTemplate>,
    ) -> Self {
        Self {
            engine,
            workflow,
            subworkflows,
        }
    }

    /// The launched workflow followed by every subworkflow.
    pub fn templates(&self) -> impl Iterator<Item = &WorkflowJobTemplate> {
        std::iter::once(&self.workflow).chain(self.subworkflows.iter())
    }
}

/// Parse durations like `"500ms"`, `"30s"`, `"10m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let seconds_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
