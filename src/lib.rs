// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod job;
pub mod logging;
pub mod notify;
pub mod types;
pub mod workflow;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::config::model::WorkflowDefinition;
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions, StandingDecision};
use crate::exec::ProcessLaunchBackend;
use crate::graph::topological_order;
use crate::job::{ExtraVars, JobStatus, TemplateKind};
use crate::notify::TracingNotifier;
use crate::types::EdgeType;
use crate::workflow::{LaunchPrompts, TemplateRegistry, WorkflowJobTemplate};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - definition loading
/// - template registry / core / runtime
/// - process launch backend
/// - Ctrl-C handling
///
/// Launches the workflow once and returns whether it finished successfully.
pub async fn run(args: CliArgs) -> Result<bool> {
    let config_path = PathBuf::from(&args.config);
    let definition = load_and_validate(&config_path)
        .with_context(|| format!("loading workflow definition {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&definition);
        return Ok(true);
    }

    let prompts = prompts_from_args(&args)?;
    let decisions = approval_decisions(&definition, &args)?;
    let template = definition.workflow.name.clone();

    let registry = TemplateRegistry::new();
    registry.insert(definition.workflow)?;
    for subworkflow in definition.subworkflows {
        registry.insert(subworkflow)?;
    }

    let options = RuntimeOptions {
        exit_when_idle: true,
        approval_check_interval: definition.engine.approval_check_interval,
    };

    // Construct the pure core runtime (single source of truth for semantics).
    let mut core = CoreRuntime::new(registry, definition.engine, options);
    for (node, decision) in decisions {
        core.decide_when_opened(node, decision);
    }

    // Launch directly on the core so prompt and graph errors surface here.
    let launched = core.launch_workflow(&template, prompts, Utc::now())?;
    let workflow_job = launched.job_id;
    info!(workflow = %template, job_id = %workflow_job, "launched workflow job");

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let backend = ProcessLaunchBackend::new(rt_tx.clone());

    // Ctrl-C: cancel the workflow job, a second Ctrl-C stops the runtime.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let _ = tx
                .send(RuntimeEvent::CancelJob {
                    job_id: workflow_job,
                })
                .await;
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
            }
        });
    }

    let runtime = Runtime::new(core, rt_rx, backend, Arc::new(TracingNotifier));
    let core = runtime.run_from(launched.step).await?;

    let status = core.job(workflow_job).map(|j| j.status);
    println!(
        "workflow job {} ({}): {}",
        workflow_job,
        template,
        status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string())
    );
    Ok(status == Some(JobStatus::Successful))
}

/// Turn `--approve` / `--deny` into standing decisions.
///
/// Every name must be an approval node of the definition and may be decided
/// only once. Approval nodes that would never time out must be decided up
/// front, otherwise a one-shot run could not finish.
pub fn approval_decisions(
    definition: &WorkflowDefinition,
    args: &CliArgs,
) -> Result<Vec<(String, StandingDecision)>> {
    let mut gates: BTreeMap<&str, bool> = BTreeMap::new();
    for workflow in definition.templates() {
        let graph = workflow.graph();
        for id in graph.node_ids() {
            let Some(node) = graph.node(id) else {
                continue;
            };
            if let Some(TemplateKind::Approval { timeout }) =
                node.unified_job_template.as_ref().map(|t| &t.kind)
            {
                let expires = (*timeout)
                    .or(definition.engine.approval_default_timeout)
                    .is_some_and(|t| !t.is_zero());
                let entry = gates.entry(node.identifier.as_str()).or_insert(true);
                *entry = *entry && expires;
            }
        }
    }

    let mut decisions: BTreeMap<String, StandingDecision> = BTreeMap::new();
    let requested = args
        .approve
        .iter()
        .map(|n| (n, StandingDecision::Approve))
        .chain(args.deny.iter().map(|n| (n, StandingDecision::Deny)));
    for (node, decision) in requested {
        if !gates.contains_key(node.as_str()) {
            anyhow::bail!("'{node}' is not an approval node of this definition");
        }
        if let Some(previous) = decisions.insert(node.clone(), decision) {
            if previous != decision {
                anyhow::bail!("approval node '{node}' is both approved and denied");
            }
        }
    }

    for (node, expires) in gates {
        if !expires && !decisions.contains_key(node) {
            anyhow::bail!(
                "approval node '{node}' has no timeout; pass --approve {node} or --deny {node}"
            );
        }
    }
    Ok(decisions.into_iter().collect())
}

fn prompts_from_args(args: &CliArgs) -> Result<LaunchPrompts> {
    let extra_vars = match args.extra_vars.as_deref() {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("parsing --extra-vars")? {
            Value::Object(map) => map,
            other => anyhow::bail!("--extra-vars must be a JSON object, got {other}"),
        },
        None => ExtraVars::new(),
    };

    Ok(LaunchPrompts {
        extra_vars,
        inventory: args.inventory.clone(),
        limit: args.limit.clone(),
        scm_branch: args.scm_branch.clone(),
    })
}

/// Simple dry-run output: print engine settings, nodes and edges in
/// topological order.
fn print_dry_run(definition: &WorkflowDefinition) {
    let engine = &definition.engine;

    println!("towerflow dry-run");
    println!("  config.workflows_enabled = {}", engine.workflows_enabled);
    println!(
        "  config.allow_multiple_parents = {}",
        engine.allow_multiple_parents
    );
    if let Some(max) = engine.max_nodes_per_workflow {
        println!("  config.max_nodes_per_workflow = {max}");
    }
    if let Some(timeout) = engine.approval_default_timeout {
        println!("  config.approval_default_timeout = {timeout:?}");
    }
    println!();

    print_workflow(&definition.workflow);
    for subworkflow in &definition.subworkflows {
        println!();
        print_workflow(subworkflow);
    }

    debug!("dry-run complete (no execution)");
}

fn print_workflow(workflow: &WorkflowJobTemplate) {
    let graph = workflow.graph();
    println!("workflow {} ({} nodes):", workflow.name, graph.len());
    let order = topological_order(graph).unwrap_or_else(|_| graph.node_ids().collect());
    for id in order {
        let Some(node) = graph.node(id) else {
            continue;
        };
        println!("  - {}", node.identifier);
        match &node.unified_job_template {
            Some(template) => {
                println!("      template: {}", template.name);
                if let Some(nested) = template.nested_workflow() {
                    println!("      runs workflow: {nested}");
                }
                if let Some(cmd) = &template.cmd {
                    println!("      cmd: {cmd}");
                }
            }
            None => println!("      template: <missing>"),
        }
        if node.all_parents_must_converge {
            println!("      all_parents_must_converge: true");
        }
        for edge_type in EdgeType::ALL {
            let children: Vec<String> = graph.children(id, edge_type).map(|c| graph.label(c)).collect();
            if !children.is_empty() {
                println!("      {edge_type}: {children:?}");
            }
        }
    }
}
