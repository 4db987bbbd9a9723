use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;
use towerflow::config::{load_and_validate, load_from_path, parse_duration};
use towerflow::errors::TowerflowError;
use towerflow::graph::{topological_order, ParentPolicy};
use towerflow::job::TemplateKind;
use towerflow::types::EdgeType;
use towerflow_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name)
}

fn write_config(contents: &str) -> Result<(tempfile::TempDir, PathBuf), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("Towerflow.toml");
    fs::write(&path, contents)?;
    Ok((dir, path))
}

#[test]
fn deploy_demo_builds_the_expected_graph() -> TestResult {
    init_tracing();
    let definition = load_and_validate(demo("deploy.toml"))?;

    assert!(definition.engine.workflows_enabled);
    assert_eq!(
        definition.engine.approval_default_timeout,
        Some(Duration::from_secs(30 * 60))
    );
    assert_eq!(definition.engine.graph_policy().parents, ParentPolicy::Single);

    let workflow = &definition.workflow;
    assert_eq!(workflow.name, "deploy");
    assert_eq!(workflow.extra_vars.get("env"), Some(&json!("staging")));
    assert!(workflow.prompts.ask_limit_on_launch);
    assert!(!workflow.prompts.ask_inventory_on_launch);

    let graph = workflow.graph();
    assert_eq!(graph.len(), 5);
    let test = graph.require("test")?;
    let deploy = graph.require("deploy")?;
    let report = graph.require("report")?;
    assert!(graph.has_edge(test, deploy, EdgeType::Success));
    assert!(graph.has_edge(test, report, EdgeType::Failure));
    assert_eq!(graph.roots(), vec![graph.require("build")?]);

    let deploy_node = graph.node(deploy).ok_or("deploy node")?;
    assert_eq!(deploy_node.overrides.limit.as_deref(), Some("webservers"));
    assert_eq!(deploy_node.overrides.credentials, vec!["ssh-prod".to_string()]);
    let test_node = graph.node(test).ok_or("test node")?;
    assert_eq!(test_node.overrides.extra_data.get("suite"), Some(&json!("smoke")));

    let report_template = graph
        .node(report)
        .and_then(|n| n.unified_job_template.as_ref())
        .ok_or("report template")?;
    assert!(report_template.cmd.is_none());

    assert!(topological_order(graph).is_ok());
    Ok(())
}

#[test]
fn approval_demo_uses_convergence_and_template_kinds() -> TestResult {
    let definition = load_and_validate(demo("approval.toml"))?;

    assert!(definition.engine.allow_multiple_parents);
    assert_eq!(
        definition.engine.approval_check_interval,
        Duration::from_millis(500)
    );

    let graph = definition.workflow.graph();
    let sign_off = graph.require("sign_off")?;
    let node = graph.node(sign_off).ok_or("sign_off")?;
    assert!(node.all_parents_must_converge);
    assert!(node.is_approval());
    assert_eq!(
        node.unified_job_template.as_ref().map(|t| &t.kind),
        Some(&TemplateKind::Approval {
            timeout: Some(Duration::from_secs(10))
        })
    );
    assert_eq!(graph.parents_of(sign_off).len(), 2);

    let sync = graph.require("sync")?;
    assert_eq!(
        graph
            .node(sync)
            .and_then(|n| n.unified_job_template.as_ref())
            .map(|t| &t.kind),
        Some(&TemplateKind::Project {
            scm_branch: Some("main".to_string())
        })
    );
    Ok(())
}

#[test]
fn minimal_definition_gets_defaults() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[workflow]
name = "tiny"

[node.only]
"#,
    )?;

    let raw = load_from_path(&path)?;
    assert!(raw.template.is_empty());

    let definition = load_and_validate(&path)?;
    assert_eq!(definition.engine.approval_check_interval, Duration::from_secs(1));
    assert_eq!(definition.engine.approval_default_timeout, None);
    assert!(!definition.workflow.allow_simultaneous);

    // A node without a template is kept; it fails when the workflow runs.
    let graph = definition.workflow.graph();
    let only = graph.require("only")?;
    assert!(graph
        .node(only)
        .is_some_and(|n| n.unified_job_template.is_none()));
    Ok(())
}

#[test]
fn unknown_references_are_rejected() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[node.a]
template = "nope"
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::ConfigError(ref msg) if msg.contains("nope")));

    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[node.a]
success = ["ghost"]
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::ConfigError(ref msg) if msg.contains("ghost")));
    Ok(())
}

#[test]
fn cycles_in_the_file_are_rejected() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[node.a]
success = ["b"]

[node.b]
success = ["c"]

[node.c]
failure = ["a"]
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::CycleDetected(_)));
    Ok(())
}

#[test]
fn edge_rules_apply_to_file_definitions() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[node.a]
success = ["b"]
always = ["c"]

[node.b]

[node.c]
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::InvalidEdgeType(_)));

    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[node.a]
success = ["c"]

[node.b]
success = ["c"]

[node.c]
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::Validation(_)));
    Ok(())
}

#[test]
fn invalid_engine_settings_are_rejected() -> TestResult {
    for config in [
        "max_nodes_per_workflow = 0",
        "approval_check_interval = \"0s\"",
        "approval_default_timeout = \"soon\"",
    ] {
        let (_dir, path) = write_config(&format!(
            "[config]\n{config}\n\n[workflow]\nname = \"wf\"\n\n[node.a]\n"
        ))?;
        let err = load_and_validate(&path).unwrap_err();
        assert!(matches!(err, TowerflowError::ConfigError(_)), "{config}");
    }

    let (_dir, path) = write_config(
        "[config]\nmax_nodes_per_workflow = 1\n\n[workflow]\nname = \"wf\"\n\n[node.a]\n\n[node.b]\n",
    )?;
    assert!(matches!(
        load_and_validate(&path),
        Err(TowerflowError::Validation(_))
    ));
    Ok(())
}

#[test]
fn templates_require_their_kind_fields() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[template.play]
kind = "job_template"

[node.a]
template = "play"
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::ConfigError(ref msg) if msg.contains("playbook")));

    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[template.odd]
kind = "webhook"

[node.a]
template = "odd"
"#,
    )?;
    assert!(matches!(
        load_and_validate(&path),
        Err(TowerflowError::ConfigError(_))
    ));
    Ok(())
}

#[test]
fn malformed_toml_is_a_toml_error() -> TestResult {
    let (_dir, path) = write_config("[workflow\nname = ")?;
    assert!(matches!(
        load_and_validate(&path),
        Err(TowerflowError::TomlError(_))
    ));
    assert!(matches!(
        load_and_validate("/definitely/not/here.toml"),
        Err(TowerflowError::IoError(_))
    ));
    Ok(())
}

#[test]
fn durations_parse_with_units() {
    assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
    assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
    assert_eq!(parse_duration(" 10m "), Ok(Duration::from_secs(600)));
    assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("5d").is_err());
    assert!(parse_duration("9999999999999999h").is_err());
    assert!(parse_duration("99999999999999999999s").is_err());
}

#[test]
fn nested_demo_registers_the_subworkflow() -> TestResult {
    let definition = load_and_validate(demo("nested.toml"))?;

    assert_eq!(definition.workflow.name, "release");
    assert_eq!(definition.subworkflows.len(), 1);
    let smoke = &definition.subworkflows[0];
    assert_eq!(smoke.name, "smoke");
    assert_eq!(smoke.extra_vars.get("attempts"), Some(&json!(3)));
    assert_eq!(smoke.graph().len(), 2);
    assert_eq!(smoke.graph().roots(), vec![smoke.graph().require("ping")?]);

    let graph = definition.workflow.graph();
    let node = graph.node(graph.require("smoke")?).ok_or("smoke node")?;
    let template = node.unified_job_template.as_ref().ok_or("smoke template")?;
    assert_eq!(template.nested_workflow(), Some("smoke"));

    let names: Vec<&str> = definition.templates().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["release", "smoke"]);
    Ok(())
}

#[test]
fn nested_workflow_references_are_checked() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[template.inner]
kind = "workflow_job_template"
workflow = "missing"

[node.a]
template = "inner"
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::ConfigError(ref msg) if msg.contains("missing")));

    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[template.inner]
kind = "workflow_job_template"

[node.a]
template = "inner"
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::ConfigError(ref msg) if msg.contains("workflow")));
    Ok(())
}

#[test]
fn workflows_that_launch_themselves_are_rejected() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[template.again]
kind = "workflow_job_template"
workflow = "wf"

[node.a]
template = "again"
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::CycleDetected(_)));

    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[template.to_left]
kind = "workflow_job_template"
workflow = "left"

[template.to_right]
kind = "workflow_job_template"
workflow = "right"

[node.a]
template = "to_left"

[subworkflow.left.node.l]
template = "to_right"

[subworkflow.right.node.r]
template = "to_left"
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::CycleDetected(_)));
    Ok(())
}

#[test]
fn approval_timeouts_are_capped() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[workflow]
name = "wf"

[template.gate]
kind = "approval"
timeout = "100000000000h"

[node.a]
template = "gate"
"#,
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::ConfigError(ref msg) if msg.contains("ten year")));

    let (_dir, path) = write_config(
        "[config]\napproval_default_timeout = \"100000h\"\n\n[workflow]\nname = \"wf\"\n\n[node.a]\n",
    )?;
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TowerflowError::ConfigError(_)));

    let (_dir, path) = write_config(
        "[config]\napproval_default_timeout = \"87000h\"\n\n[workflow]\nname = \"wf\"\n\n[node.a]\n",
    )?;
    let definition = load_and_validate(&path)?;
    assert_eq!(
        definition.engine.approval_default_timeout,
        Some(Duration::from_secs(87_000 * 3600))
    );
    Ok(())
}
