use std::error::Error;

use chrono::Utc;
use serde_json::json;
use towerflow::config::EngineConfig;
use towerflow::engine::CoreRuntime;
use towerflow::errors::TowerflowError;
use towerflow::job::{JobStatus, LaunchOverrides, UnifiedJobKind};
use towerflow::types::{JobId, LaunchType};
use towerflow::workflow::{LaunchPrompts, WorkflowJobTemplate};
use towerflow_test_utils::builders::{core_with, nested_template, vars, WorkflowBuilder};
use towerflow_test_utils::fake_launcher::{drive, Script};
use towerflow_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

/// `prepare -> inner (runs "child") -(success)-> publish`, `-(failure)-> cleanup`.
fn parent() -> WorkflowJobTemplate {
    WorkflowBuilder::new("parent")
        .job("prepare")
        .nested("inner", "child")
        .job("publish")
        .job("cleanup")
        .success("prepare", "inner")
        .success("inner", "publish")
        .failure("inner", "cleanup")
        .extra_vars(json!({"release": "1.2"}))
        .build()
}

/// `lint -> unit`.
fn child() -> WorkflowJobTemplate {
    WorkflowBuilder::new("child")
        .job("lint")
        .job("unit")
        .success("lint", "unit")
        .extra_vars(json!({"suite": "fast"}))
        .build()
}

fn node_job(core: &CoreRuntime, workflow: JobId, node: &str) -> Result<JobId, Box<dyn Error>> {
    core.workflow(workflow)
        .and_then(|wf| wf.job_of(node))
        .ok_or_else(|| format!("node {node} has no job").into())
}

#[test]
fn nested_workflow_runs_and_its_success_drives_the_parent() -> TestResult {
    init_tracing();
    let mut core = core_with(vec![parent(), child()], EngineConfig::default());
    let launched = core.launch_workflow("parent", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    let recorded = drive(&mut core, launched.step, &Script::new());

    assert_eq!(
        recorded.launched_names(),
        vec!["prepare", "lint", "unit", "publish"]
    );

    let inner = node_job(&core, workflow, "inner")?;
    let job = core.job(inner).ok_or("inner job")?;
    assert_eq!(
        job.kind,
        UnifiedJobKind::WorkflowJob {
            template: "child".to_string()
        }
    );
    assert_eq!(job.launch_type, LaunchType::Workflow);
    assert_eq!(job.status, JobStatus::Successful);
    let spawned_by = job.spawned_by.ok_or("inner was not spawned")?;
    assert_eq!(spawned_by.workflow_job, workflow);
    assert_eq!(
        core.workflow(workflow).map(|wf| wf.graph().label(spawned_by.node)),
        Some("inner".to_string())
    );

    let controller = core.workflow(inner).ok_or("child controller")?;
    assert_eq!(controller.name(), "child");
    assert!(controller.is_done());

    assert_eq!(
        core.job(workflow).map(|j| j.status),
        Some(JobStatus::Successful)
    );
    assert!(core.is_idle());
    Ok(())
}

#[test]
fn parent_vars_reach_the_nested_workflow_jobs() -> TestResult {
    let mut core = core_with(vec![parent(), child()], EngineConfig::default());
    let launched = core.launch_workflow("parent", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    let script = Script::new().finish("prepare", JobStatus::Successful, vars(json!({"build_id": 7})));
    let recorded = drive(&mut core, launched.step, &script);

    let lint = recorded
        .launched
        .iter()
        .find(|r| r.name == "lint")
        .ok_or("lint was not launched")?;
    let lint_vars = lint.config.extra_vars();
    assert_eq!(lint_vars.get("release"), Some(&json!("1.2")));
    assert_eq!(lint_vars.get("build_id"), Some(&json!(7)));
    assert_eq!(lint_vars.get("suite"), Some(&json!("fast")));

    let inner = node_job(&core, workflow, "inner")?;
    assert_eq!(lint_vars.get("workflow_job_id"), Some(&json!(inner.0)));
    Ok(())
}

#[test]
fn nested_failure_follows_the_parent_failure_edge() -> TestResult {
    let mut core = core_with(vec![parent(), child()], EngineConfig::default());
    let launched = core.launch_workflow("parent", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    let recorded = drive(&mut core, launched.step, &Script::new().fail("unit"));

    assert_eq!(
        recorded.launched_names(),
        vec!["prepare", "lint", "unit", "cleanup"]
    );
    let inner = node_job(&core, workflow, "inner")?;
    let job = core.job(inner).ok_or("inner job")?;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.job_explanation,
        "No error handling path for workflow job node(s)."
    );
    assert!(core.workflow(workflow).and_then(|wf| wf.job_of("publish")).is_none());

    // The failure was handled by `cleanup`.
    assert_eq!(
        core.job(workflow).map(|j| j.status),
        Some(JobStatus::Successful)
    );
    Ok(())
}

#[test]
fn canceling_the_parent_cancels_the_nested_workflow() -> TestResult {
    init_tracing();
    let mut core = core_with(vec![parent(), child()], EngineConfig::default());
    let launched = core.launch_workflow("parent", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    drive(&mut core, launched.step, &Script::new().hold("lint"));

    let inner = node_job(&core, workflow, "inner")?;
    let lint = node_job(&core, inner, "lint")?;
    assert_eq!(core.job(inner).map(|j| j.status), Some(JobStatus::Running));
    assert_eq!(core.job(lint).map(|j| j.status), Some(JobStatus::Running));

    let step = core.cancel_job(workflow, Utc::now())?;
    assert_eq!(step.canceled_jobs(), vec![lint]);

    let recorded = drive(&mut core, step, &Script::new());
    assert_eq!(recorded.canceled, vec![lint]);
    for job in [lint, inner, workflow] {
        assert_eq!(core.job(job).map(|j| j.status), Some(JobStatus::Canceled));
    }
    assert!(core.workflow(inner).and_then(|wf| wf.job_of("unit")).is_none());
    assert!(core.workflow(workflow).and_then(|wf| wf.job_of("publish")).is_none());
    assert!(core.is_idle());
    Ok(())
}

#[test]
fn canceling_the_nested_job_fails_its_parent_node() -> TestResult {
    let mut core = core_with(vec![parent(), child()], EngineConfig::default());
    let launched = core.launch_workflow("parent", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    drive(&mut core, launched.step, &Script::new().hold("lint"));

    let inner = node_job(&core, workflow, "inner")?;
    let step = core.cancel_job(inner, Utc::now())?;
    let recorded = drive(&mut core, step, &Script::new());

    assert_eq!(recorded.launched_names(), vec!["cleanup"]);
    assert_eq!(core.job(inner).map(|j| j.status), Some(JobStatus::Canceled));
    assert_eq!(
        core.job(workflow).map(|j| j.status),
        Some(JobStatus::Successful)
    );
    Ok(())
}

#[test]
fn workflow_running_itself_fails_the_node() -> TestResult {
    let looping = WorkflowBuilder::new("looping")
        .nested("again", "looping")
        .job("report")
        .failure("again", "report")
        .build();
    let mut core = core_with(vec![looping], EngineConfig::default());
    let launched = core.launch_workflow("looping", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    let recorded = drive(&mut core, launched.step, &Script::new());

    assert_eq!(recorded.launched_names(), vec!["report"]);
    let again = node_job(&core, workflow, "again")?;
    let job = core.job(again).ok_or("again job")?;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(
        job.job_explanation.contains("would result in recursion"),
        "{}",
        job.job_explanation
    );
    assert!(job.job_explanation.contains("looping, looping"));
    assert!(core.workflow(again).is_none());
    Ok(())
}

#[test]
fn recursion_through_another_workflow_is_caught() -> TestResult {
    let outer = WorkflowBuilder::new("outer").nested("down", "middle").build();
    let middle = WorkflowBuilder::new("middle").nested("up", "outer").build();
    let mut core = core_with(vec![outer, middle], EngineConfig::default());
    let launched = core.launch_workflow("outer", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    let recorded = drive(&mut core, launched.step, &Script::new());

    assert!(recorded.launched.is_empty());
    let down = node_job(&core, workflow, "down")?;
    let up = node_job(&core, down, "up")?;
    let job = core.job(up).ok_or("up job")?;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.job_explanation.contains("outer, middle, outer"));
    assert_eq!(core.job(down).map(|j| j.status), Some(JobStatus::Failed));
    assert_eq!(core.job(workflow).map(|j| j.status), Some(JobStatus::Failed));
    Ok(())
}

#[test]
fn missing_nested_template_fails_the_node() -> TestResult {
    let mut core = core_with(vec![parent()], EngineConfig::default());
    let launched = core.launch_workflow("parent", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    let recorded = drive(&mut core, launched.step, &Script::new());

    assert_eq!(recorded.launched_names(), vec!["prepare", "cleanup"]);
    let inner = node_job(&core, workflow, "inner")?;
    let job = core.job(inner).ok_or("inner job")?;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .job_explanation
        .starts_with("Job spawned from workflow could not start"));
    Ok(())
}

#[test]
fn nested_templates_cannot_run_outside_a_workflow() {
    let mut core = core_with(vec![child()], EngineConfig::default());
    let result = core.launch_job(
        &nested_template("inner", "child"),
        &LaunchOverrides::default(),
        Utc::now(),
    );
    assert!(matches!(result, Err(TowerflowError::Validation(_))));
    assert!(core.jobs().is_empty());
}

#[test]
fn spawned_workflow_jobs_are_not_relaunched_directly() -> TestResult {
    let mut core = core_with(vec![parent(), child()], EngineConfig::default());
    let launched = core.launch_workflow("parent", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    drive(&mut core, launched.step, &Script::new());

    let inner = node_job(&core, workflow, "inner")?;
    assert!(matches!(
        core.relaunch(inner, Utc::now()),
        Err(TowerflowError::Validation(_))
    ));
    Ok(())
}
