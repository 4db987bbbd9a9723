// src/workflow/template.rs

//! Workflow job templates and launch-time prompt handling.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{Result, TowerflowError};
use crate::graph::{ensure_acyclic, GraphPolicy, NodeGraph, NodeSpec};
use crate::job::launch_config::merge_into;
use crate::job::{ExtraVars, JobLaunchConfig, LaunchOverrides};
use crate::types::{EdgeType, NodeId};

/// Which fields a launch may override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PromptFlags {
    #[serde(default)]
    pub ask_inventory_on_launch: bool,
    #[serde(default)]
    pub ask_limit_on_launch: bool,
    #[serde(default)]
    pub ask_scm_branch_on_launch: bool,
    #[serde(default)]
    pub ask_variables_on_launch: bool,
}

/// Values supplied when launching a workflow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchPrompts {
    pub extra_vars: ExtraVars,
    pub inventory: Option<String>,
    pub limit: Option<String>,
    pub scm_branch: Option<String>,
}

/// Workflow-level launch parameters, resolved once per workflow job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowLaunch {
    pub extra_vars: ExtraVars,
    pub inventory: Option<String>,
    pub limit: Option<String>,
    pub scm_branch: Option<String>,
}

impl WorkflowLaunch {
    /// Node overrides with the workflow-level prompts layered on top.
    pub fn apply_to(&self, node: &LaunchOverrides) -> LaunchOverrides {
        let mut effective = node.clone();
        if self.inventory.is_some() {
            effective.inventory = self.inventory.clone();
        }
        if self.limit.is_some() {
            effective.limit = self.limit.clone();
        }
        if self.scm_branch.is_some() {
            effective.scm_branch = self.scm_branch.clone();
        }
        effective
    }
}

/// A reusable workflow definition.
#[derive(Debug, Clone)]
pub struct WorkflowJobTemplate {
    pub name: String,
    pub organization: Option<String>,
    pub extra_vars: ExtraVars,
    /// Survey in the API's `{"spec": [{"variable": .., "required": .., "default": ..}]}` shape.
    pub survey_spec: Option<Value>,
    pub prompts: PromptFlags,
    /// Allow more than one active workflow job of this template at a time.
    pub allow_simultaneous: bool,
    graph: NodeGraph,
}

impl WorkflowJobTemplate {
    pub fn new(name: impl Into<String>, policy: GraphPolicy) -> Self {
        Self {
            name: name.into(),
            organization: None,
            extra_vars: ExtraVars::new(),
            survey_spec: None,
            prompts: PromptFlags::default(),
            allow_simultaneous: false,
            graph: NodeGraph::new(policy),
        }
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId> {
        self.graph.add_node(spec)
    }

    pub fn add_edge(&mut self, parent: &str, child: &str, edge_type: EdgeType) -> Result<()> {
        self.graph.add_edge_between(parent, child, edge_type)
    }

    pub fn add_child_node(&mut self, parent: &str, spec: NodeSpec, edge_type: EdgeType) -> Result<NodeId> {
        let parent = self.graph.require(parent)?;
        self.graph.add_child_node(parent, spec, edge_type)
    }

    pub fn remove_edge(&mut self, parent: &str, child: &str, edge_type: EdgeType) -> Result<bool> {
        let parent = self.graph.require(parent)?;
        let child = self.graph.require(child)?;
        Ok(self.graph.remove_edge(parent, child, edge_type))
    }

    pub fn remove_node(&mut self, identifier: &str) -> Result<NodeSpec> {
        self.graph.remove_node(identifier)
    }

    /// Check prompts against the template's flags and survey and produce the
    /// workflow-level launch parameters.
    pub fn resolve_launch(&self, prompts: &LaunchPrompts) -> Result<WorkflowLaunch> {
        let mut rejected = Vec::new();
        if !prompts.extra_vars.is_empty()
            && !self.prompts.ask_variables_on_launch
            && self.survey_spec.is_none()
        {
            rejected.push("extra_vars");
        }
        if prompts.inventory.is_some() && !self.prompts.ask_inventory_on_launch {
            rejected.push("inventory");
        }
        if prompts.limit.is_some() && !self.prompts.ask_limit_on_launch {
            rejected.push("limit");
        }
        if prompts.scm_branch.is_some() && !self.prompts.ask_scm_branch_on_launch {
            rejected.push("scm_branch");
        }
        if !rejected.is_empty() {
            return Err(TowerflowError::Validation(format!(
                "workflow '{}' does not prompt on launch for: {}",
                self.name,
                rejected.join(", ")
            )));
        }

        Ok(WorkflowLaunch {
            extra_vars: self.layer_vars(&prompts.extra_vars)?,
            inventory: prompts.inventory.clone(),
            limit: prompts.limit.clone(),
            scm_branch: prompts.scm_branch.clone(),
        })
    }

    /// Launch parameters for a workflow job spawned by a node of another
    /// workflow. The node's resolved configuration is passed through without
    /// prompt checks; survey answers are still required.
    pub fn resolve_spawned_launch(&self, config: &JobLaunchConfig) -> Result<WorkflowLaunch> {
        Ok(WorkflowLaunch {
            extra_vars: self.layer_vars(config.extra_vars())?,
            inventory: config.inventory().map(str::to_string),
            limit: config.limit().map(str::to_string),
            scm_branch: config.scm_branch().map(str::to_string),
        })
    }

    /// Template vars, then survey defaults, then `supplied`.
    fn layer_vars(&self, supplied: &ExtraVars) -> Result<ExtraVars> {
        let mut extra_vars = self.extra_vars.clone();
        merge_into(&mut extra_vars, &self.survey_defaults());
        merge_into(&mut extra_vars, supplied);

        let missing = self.missing_survey_answers(&extra_vars);
        if !missing.is_empty() {
            return Err(TowerflowError::Validation(format!(
                "variables needed to start workflow '{}': {}",
                self.name,
                missing.join(", ")
            )));
        }
        Ok(extra_vars)
    }

    /// Snapshot the graph for a new workflow job.
    pub fn snapshot_graph(&self) -> Result<NodeGraph> {
        if self.graph.is_empty() {
            return Err(TowerflowError::Validation(format!(
                "workflow '{}' has no nodes",
                self.name
            )));
        }
        ensure_acyclic(&self.graph)?;
        Ok(self.graph.clone())
    }

    fn survey_questions(&self) -> impl Iterator<Item = &Value> {
        self.survey_spec
            .as_ref()
            .and_then(|s| s.get("spec"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
    }

    fn survey_defaults(&self) -> ExtraVars {
        let mut defaults = ExtraVars::new();
        for question in self.survey_questions() {
            let name = question.get("variable").and_then(Value::as_str);
            let default = question.get("default").filter(|v| !is_blank(v));
            if let (Some(name), Some(default)) = (name, default) {
                defaults.insert(name.to_string(), default.clone());
            }
        }
        defaults
    }

    fn missing_survey_answers(&self, vars: &ExtraVars) -> Vec<String> {
        self.survey_questions()
            .filter(|q| q.get("required").and_then(Value::as_bool).unwrap_or(false))
            .filter_map(|q| q.get("variable").and_then(Value::as_str))
            .filter(|name| vars.get(*name).is_none_or(is_blank))
            .map(str::to_string)
            .collect()
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
