// src/config/validate.rs

use std::collections::BTreeMap;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{
    parse_duration, EngineConfig, NodeSection, RawConfigFile, RawEngineSection, TemplateSection,
    WorkflowDefinition, WorkflowSection,
};
use crate::errors::{Result, TowerflowError};
use crate::graph::NodeSpec;
use crate::job::{TemplateKind, UnifiedJobTemplate};
use crate::types::EdgeType;
use crate::workflow::WorkflowJobTemplate;

impl TryFrom<RawConfigFile> for WorkflowDefinition {
    type Error = TowerflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let engine = engine_config(&raw.config)?;
        let templates = build_templates(&raw.template)?;
        let workflow = build_workflow(&raw.workflow, &raw.node, &engine, &templates)?;
        let subworkflows = raw
            .subworkflow
            .iter()
            .map(|(name, section)| {
                build_workflow(&section.settings(name), &section.node, &engine, &templates)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(WorkflowDefinition::new_unchecked(engine, workflow, subworkflows))
    }
}

/// `(workflow name, nodes)` for the launched workflow and every subworkflow.
fn node_sets(cfg: &RawConfigFile) -> Vec<(&str, &BTreeMap<String, NodeSection>)> {
    std::iter::once((cfg.workflow.name.as_str(), &cfg.node))
        .chain(
            cfg.subworkflow
                .iter()
                .map(|(name, section)| (name.as_str(), &section.node)),
        )
        .collect()
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_nodes(cfg)?;
    for (workflow, nodes) in node_sets(cfg) {
        validate_node_references(workflow, nodes, cfg)?;
        validate_dag(workflow, nodes)?;
    }
    validate_workflow_references(cfg)?;
    Ok(())
}

fn ensure_has_nodes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.workflow.name.trim().is_empty() {
        return Err(TowerflowError::ConfigError(
            "[workflow].name must not be empty".to_string(),
        ));
    }
    if cfg.node.is_empty() {
        return Err(TowerflowError::ConfigError(
            "definition must contain at least one [node.<identifier>] section".to_string(),
        ));
    }
    if cfg.subworkflow.contains_key(&cfg.workflow.name) {
        return Err(TowerflowError::ConfigError(format!(
            "[subworkflow.{0}] has the same name as [workflow] '{0}'",
            cfg.workflow.name
        )));
    }
    for (name, section) in &cfg.subworkflow {
        if section.node.is_empty() {
            return Err(TowerflowError::ConfigError(format!(
                "[subworkflow.{name}] must contain at least one node"
            )));
        }
    }
    Ok(())
}

fn validate_node_references(
    workflow: &str,
    nodes: &BTreeMap<String, NodeSection>,
    cfg: &RawConfigFile,
) -> Result<()> {
    for (name, node) in nodes.iter() {
        if let Some(template) = &node.template {
            if !cfg.template.contains_key(template) {
                return Err(TowerflowError::ConfigError(format!(
                    "workflow '{}': node '{}' references unknown template '{}'",
                    workflow, name, template
                )));
            }
        }
        for (edge_type, child) in edges_of(node) {
            if !nodes.contains_key(child) {
                return Err(TowerflowError::ConfigError(format!(
                    "workflow '{}': node '{}' has unknown child '{}' in `{}`",
                    workflow, name, child, edge_type
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(workflow: &str, nodes: &BTreeMap<String, NodeSection>) -> Result<()> {
    // Edge direction: parent -> child, whatever the edge type.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in nodes.keys() {
        graph.add_node(name.as_str());
    }

    for (name, node) in nodes.iter() {
        for (_, child) in edges_of(node) {
            graph.add_edge(name.as_str(), child.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TowerflowError::CycleDetected(format!(
            "cycle detected in workflow '{}' involving node '{}'",
            workflow,
            cycle.node_id()
        ))),
    }
}

/// Workflow templates named by `workflow_job_template` templates must exist,
/// and no workflow may end up launching itself.
fn validate_workflow_references(cfg: &RawConfigFile) -> Result<()> {
    let mut launches: DiGraphMap<&str, ()> = DiGraphMap::new();
    for (workflow, nodes) in node_sets(cfg) {
        launches.add_node(workflow);
        for node in nodes.values() {
            let Some(section) = node.template.as_ref().and_then(|t| cfg.template.get(t)) else {
                continue;
            };
            let Some(target) = section.workflow.as_deref() else {
                continue;
            };
            if section.kind.trim() != "workflow_job_template" {
                continue;
            }
            if target != cfg.workflow.name && !cfg.subworkflow.contains_key(target) {
                return Err(TowerflowError::ConfigError(format!(
                    "workflow '{}' runs unknown workflow '{}'",
                    workflow, target
                )));
            }
            launches.add_edge(workflow, target, ());
        }
    }

    // A self-loop is a cycle for toposort too.
    match toposort(&launches, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TowerflowError::CycleDetected(format!(
            "workflow '{}' would end up launching itself",
            cycle.node_id()
        ))),
    }
}

fn edges_of(node: &NodeSection) -> impl Iterator<Item = (EdgeType, &String)> {
    node.success
        .iter()
        .map(|c| (EdgeType::Success, c))
        .chain(node.failure.iter().map(|c| (EdgeType::Failure, c)))
        .chain(node.always.iter().map(|c| (EdgeType::Always, c)))
}

fn engine_config(raw: &RawEngineSection) -> Result<EngineConfig> {
    if raw.max_nodes_per_workflow == Some(0) {
        return Err(TowerflowError::ConfigError(
            "[config].max_nodes_per_workflow must be >= 1 (got 0)".to_string(),
        ));
    }

    let approval_check_interval = duration_field(
        "[config].approval_check_interval",
        &raw.approval_check_interval,
    )?;
    if approval_check_interval.is_zero() {
        return Err(TowerflowError::ConfigError(
            "[config].approval_check_interval must be greater than zero".to_string(),
        ));
    }

    let approval_default_timeout = raw
        .approval_default_timeout
        .as_deref()
        .map(|s| approval_timeout_field("[config].approval_default_timeout", s))
        .transpose()?
        .filter(|d| !d.is_zero());

    Ok(EngineConfig {
        workflows_enabled: raw.workflows_enabled,
        max_nodes_per_workflow: raw.max_nodes_per_workflow,
        approval_default_timeout,
        allow_multiple_parents: raw.allow_multiple_parents,
        approval_check_interval,
    })
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| TowerflowError::ConfigError(format!("{field}: {e}")))
}

/// Longest approval timeout a definition may ask for (ten years).
pub const MAX_APPROVAL_TIMEOUT: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

fn approval_timeout_field(field: &str, value: &str) -> Result<Duration> {
    let timeout = duration_field(field, value)?;
    if timeout > MAX_APPROVAL_TIMEOUT {
        return Err(TowerflowError::ConfigError(format!(
            "{field}: approval timeout '{value}' exceeds the ten year maximum"
        )));
    }
    Ok(timeout)
}

fn build_templates(
    sections: &BTreeMap<String, TemplateSection>,
) -> Result<BTreeMap<String, UnifiedJobTemplate>> {
    let mut templates = BTreeMap::new();
    for (name, section) in sections {
        let kind = template_kind(name, section)?;
        let mut template = UnifiedJobTemplate::new(name.clone(), kind);
        template.cmd = section.cmd.clone();
        templates.insert(name.clone(), template);
    }
    Ok(templates)
}

fn template_kind(name: &str, section: &TemplateSection) -> Result<TemplateKind> {
    let missing = |field: &str| {
        TowerflowError::ConfigError(format!(
            "template '{}' of kind '{}' requires `{}`",
            name, section.kind, field
        ))
    };

    match section.kind.trim() {
        "job_template" => Ok(TemplateKind::JobTemplate {
            playbook: section.playbook.clone().ok_or_else(|| missing("playbook"))?,
        }),
        "project" => Ok(TemplateKind::Project {
            scm_branch: section.scm_branch.clone(),
        }),
        "inventory_source" => Ok(TemplateKind::InventorySource {
            source: section.source.clone().ok_or_else(|| missing("source"))?,
        }),
        "system_job_template" => Ok(TemplateKind::SystemJobTemplate {
            job_type: section.job_type.clone().ok_or_else(|| missing("job_type"))?,
        }),
        "workflow_job_template" => Ok(TemplateKind::WorkflowJobTemplate {
            workflow: section.workflow.clone().ok_or_else(|| missing("workflow"))?,
        }),
        "approval" => {
            let timeout = section
                .timeout
                .as_deref()
                .map(|s| approval_timeout_field(&format!("template '{name}' timeout"), s))
                .transpose()?;
            Ok(TemplateKind::Approval { timeout })
        }
        other => Err(TowerflowError::ConfigError(format!(
            "template '{}' has unknown kind '{}'",
            name, other
        ))),
    }
}

/// Build the template graph through the regular node/edge operations so the
/// same relation rules apply as for interactive edits.
fn build_workflow(
    section: &WorkflowSection,
    nodes: &BTreeMap<String, NodeSection>,
    engine: &EngineConfig,
    templates: &BTreeMap<String, UnifiedJobTemplate>,
) -> Result<WorkflowJobTemplate> {
    let mut workflow = WorkflowJobTemplate::new(section.name.clone(), engine.graph_policy());
    workflow.organization = section.organization.clone();
    workflow.extra_vars = section.extra_vars.clone();
    workflow.survey_spec = section.survey_spec.clone();
    workflow.prompts = section.prompts;
    workflow.allow_simultaneous = section.allow_simultaneous;

    for (identifier, node) in nodes.iter() {
        let spec = match node.template.as_ref().and_then(|t| templates.get(t)) {
            Some(template) => NodeSpec::new(identifier.clone(), template.clone()),
            None => NodeSpec::without_template(identifier.clone()),
        };
        workflow.add_node(
            spec.with_overrides(node.overrides.clone())
                .converging(node.all_parents_must_converge),
        )?;
    }

    for (identifier, node) in nodes.iter() {
        for (edge_type, child) in edges_of(node) {
            workflow.add_edge(identifier, child, edge_type)?;
        }
    }

    Ok(workflow)
}
