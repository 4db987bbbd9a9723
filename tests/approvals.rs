use std::error::Error;
use std::time::Duration;

use chrono::Utc;
use towerflow::config::EngineConfig;
use towerflow::engine::{CoreRuntime, RuntimeEvent, RuntimeOptions, StandingDecision};
use towerflow::errors::TowerflowError;
use towerflow::job::{JobStatus, UnifiedJobKind};
use towerflow::types::{JobId, NodeId};
use towerflow::workflow::{ApprovalDecision, ApprovalGate, LaunchPrompts, TemplateRegistry};
use towerflow_test_utils::builders::{core_with, WorkflowBuilder};
use towerflow_test_utils::fake_launcher::{drive, Script};
use towerflow_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

/// `gate` with `deploy` on approval and `rollback` on denial.
fn gated(timeout: Option<Duration>, config: EngineConfig) -> CoreRuntime {
    let template = WorkflowBuilder::new("wf")
        .approval("gate", timeout)
        .job("deploy")
        .job("rollback")
        .success("gate", "deploy")
        .failure("gate", "rollback")
        .build();
    core_with(vec![template], config)
}

fn launch(core: &mut CoreRuntime) -> Result<(JobId, JobId), Box<dyn Error>> {
    let launched = core.launch_workflow("wf", LaunchPrompts::default(), Utc::now())?;
    assert!(
        launched.step.launched_jobs().is_empty(),
        "approval gates are never handed to the backend"
    );
    let approval = core
        .workflow(launched.job_id)
        .and_then(|wf| wf.job_of("gate"))
        .ok_or("gate has no approval job")?;
    Ok((launched.job_id, approval))
}

#[test]
fn approving_follows_success_edges() -> TestResult {
    init_tracing();
    let mut core = gated(None, EngineConfig::default());
    let (workflow, approval) = launch(&mut core)?;

    let job = core.job(approval).ok_or("approval job")?;
    assert!(matches!(job.kind, UnifiedJobKind::WorkflowApproval { .. }));
    assert_eq!(job.status, JobStatus::Pending);
    assert!(core
        .workflow(workflow)
        .and_then(|wf| wf.gate("gate"))
        .is_some_and(|g| g.is_open()));

    let step = core.approve(approval, Utc::now())?;
    let recorded = drive(&mut core, step, &Script::new());

    assert_eq!(recorded.launched_names(), vec!["deploy"]);
    assert_eq!(
        core.job(approval).map(|j| j.status),
        Some(JobStatus::Successful)
    );
    assert_eq!(
        core.job(workflow).map(|j| j.status),
        Some(JobStatus::Successful)
    );
    Ok(())
}

#[test]
fn deny_is_idempotent_and_first_decision_stands() -> TestResult {
    let mut core = gated(None, EngineConfig::default());
    let (workflow, approval) = launch(&mut core)?;

    let step = core.deny(approval, Utc::now())?;
    let recorded = drive(&mut core, step, &Script::new());
    assert_eq!(recorded.launched_names(), vec!["rollback"]);

    let jobs_before = core.jobs().len();
    let err = core.deny(approval, Utc::now()).unwrap_err();
    assert!(matches!(err, TowerflowError::AlreadyActioned(ref node) if node == "gate"));
    let err = core.approve(approval, Utc::now()).unwrap_err();
    assert!(matches!(err, TowerflowError::AlreadyActioned(_)));

    assert_eq!(core.jobs().len(), jobs_before);
    assert_eq!(core.job(approval).map(|j| j.status), Some(JobStatus::Failed));
    assert_eq!(
        core.workflow(workflow)
            .and_then(|wf| wf.gate("gate"))
            .and_then(|g| g.decision()),
        Some(ApprovalDecision::Denied)
    );
    // The denial was handled by the rollback branch.
    assert_eq!(
        core.job(workflow).map(|j| j.status),
        Some(JobStatus::Successful)
    );
    Ok(())
}

#[test]
fn approval_times_out_into_the_failure_branch() -> TestResult {
    init_tracing();
    let mut core = gated(Some(Duration::from_secs(60)), EngineConfig::default());
    let (workflow, approval) = launch(&mut core)?;
    let opened = core
        .workflow(workflow)
        .and_then(|wf| wf.gate("gate"))
        .map(|g| g.opened_at)
        .ok_or("gate")?;

    let step = core.expire_approvals(opened + chrono::Duration::seconds(30))?;
    assert!(step.commands.is_empty());
    assert_eq!(core.job(approval).map(|j| j.status), Some(JobStatus::Pending));

    let step = core.expire_approvals(opened + chrono::Duration::seconds(61))?;
    let recorded = drive(&mut core, step, &Script::new());

    assert_eq!(recorded.launched_names(), vec!["rollback"]);
    let job = core.job(approval).ok_or("approval job")?;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.job_explanation, "The approval node timed out.");
    assert_eq!(
        core.workflow(workflow)
            .and_then(|wf| wf.gate("gate"))
            .and_then(|g| g.decision()),
        Some(ApprovalDecision::TimedOut)
    );

    // Deciding after the timeout is too late.
    assert!(matches!(
        core.approve(approval, Utc::now()),
        Err(TowerflowError::AlreadyActioned(_))
    ));
    Ok(())
}

#[test]
fn engine_default_timeout_applies_when_template_has_none() -> TestResult {
    let config = EngineConfig {
        approval_default_timeout: Some(Duration::from_secs(5)),
        ..EngineConfig::default()
    };
    let mut core = gated(None, config);
    let (workflow, _approval) = launch(&mut core)?;

    let gate = core
        .workflow(workflow)
        .and_then(|wf| wf.gate("gate"))
        .ok_or("gate")?;
    assert_eq!(
        gate.deadline,
        Some(gate.opened_at + chrono::Duration::seconds(5))
    );
    Ok(())
}

#[test]
fn gate_without_timeout_never_expires() -> TestResult {
    let mut core = gated(None, EngineConfig::default());
    let (_workflow, approval) = launch(&mut core)?;

    let far_future = Utc::now() + chrono::Duration::days(365);
    let step = core.expire_approvals(far_future)?;
    assert!(step.commands.is_empty());
    assert_eq!(core.job(approval).map(|j| j.status), Some(JobStatus::Pending));
    Ok(())
}

#[test]
fn zero_timeout_means_no_deadline() {
    let gate = ApprovalGate::open(
        NodeId(0),
        "gate",
        JobId(1),
        Utc::now(),
        Some(Duration::ZERO),
    );
    assert!(gate.deadline.is_none());
    assert!(gate.is_open());
}

#[test]
fn timeouts_past_the_calendar_leave_the_gate_open() {
    let opened_at = Utc::now();
    let gate = ApprovalGate::open(
        NodeId(0),
        "gate",
        JobId(1),
        opened_at,
        Some(Duration::from_secs(100_000_000_000 * 3600)),
    );
    assert!(gate.deadline.is_none());

    let gate = ApprovalGate::open(NodeId(0), "gate", JobId(1), opened_at, Some(Duration::MAX));
    assert!(gate.deadline.is_none());
    assert!(gate.is_open());
}

/// Like `gated`, but stops on its own once nothing is left to do.
fn one_shot(timeout: Option<Duration>) -> Result<CoreRuntime, Box<dyn Error>> {
    let registry = TemplateRegistry::new();
    registry.insert(
        WorkflowBuilder::new("wf")
            .approval("gate", timeout)
            .job("deploy")
            .job("rollback")
            .success("gate", "deploy")
            .failure("gate", "rollback")
            .build(),
    )?;
    let options = RuntimeOptions {
        exit_when_idle: true,
        ..RuntimeOptions::default()
    };
    Ok(CoreRuntime::new(registry, EngineConfig::default(), options))
}

#[test]
fn untimed_gate_keeps_a_one_shot_run_alive_forever() -> TestResult {
    let mut core = one_shot(None)?;
    let (workflow, approval) = launch(&mut core)?;

    let mut now = Utc::now();
    for _ in 0..1000 {
        now += chrono::Duration::days(3650);
        let step = core.step(RuntimeEvent::ApprovalTick { now });
        assert!(step.keep_running);
    }
    assert_eq!(core.job(approval).map(|j| j.status), Some(JobStatus::Pending));
    assert_eq!(core.job(workflow).map(|j| j.status), Some(JobStatus::Running));
    Ok(())
}

#[test]
fn standing_approval_releases_the_gate_when_it_opens() -> TestResult {
    init_tracing();
    let mut core = one_shot(None)?;
    core.decide_when_opened("gate", StandingDecision::Approve);

    let launched = core.launch_workflow("wf", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    let recorded = drive(&mut core, launched.step, &Script::new());

    assert_eq!(recorded.launched_names(), vec!["deploy"]);
    let approval = core
        .workflow(workflow)
        .and_then(|wf| wf.job_of("gate"))
        .ok_or("gate job")?;
    assert_eq!(core.job(approval).map(|j| j.status), Some(JobStatus::Successful));
    assert_eq!(
        core.workflow(workflow)
            .and_then(|wf| wf.gate("gate"))
            .and_then(|g| g.decision()),
        Some(ApprovalDecision::Approved)
    );
    assert_eq!(
        core.job(workflow).map(|j| j.status),
        Some(JobStatus::Successful)
    );

    let step = core.step(RuntimeEvent::ApprovalTick { now: Utc::now() });
    assert!(!step.keep_running);
    Ok(())
}

#[test]
fn standing_denial_follows_the_failure_edge() -> TestResult {
    let mut core = one_shot(Some(Duration::from_secs(3600)))?;
    core.decide_when_opened("gate", StandingDecision::Deny);
    core.decide_when_opened("unrelated", StandingDecision::Approve);

    let launched = core.launch_workflow("wf", LaunchPrompts::default(), Utc::now())?;
    let workflow = launched.job_id;
    let recorded = drive(&mut core, launched.step, &Script::new());

    assert_eq!(recorded.launched_names(), vec!["rollback"]);
    assert_eq!(
        core.workflow(workflow)
            .and_then(|wf| wf.gate("gate"))
            .and_then(|g| g.decision()),
        Some(ApprovalDecision::Denied)
    );
    // The denial was handled by the failure edge.
    assert_eq!(
        core.job(workflow).map(|j| j.status),
        Some(JobStatus::Successful)
    );
    Ok(())
}

#[test]
fn approve_rejects_jobs_that_are_not_approvals() -> TestResult {
    let mut core = gated(None, EngineConfig::default());
    let (workflow, approval) = launch(&mut core)?;

    assert!(matches!(
        core.approve(workflow, Utc::now()),
        Err(TowerflowError::Validation(_))
    ));
    assert!(matches!(
        core.deny(JobId(999), Utc::now()),
        Err(TowerflowError::JobNotFound(_))
    ));
    assert_eq!(core.job(approval).map(|j| j.status), Some(JobStatus::Pending));
    Ok(())
}

#[test]
fn canceling_the_workflow_closes_open_gates() -> TestResult {
    let mut core = gated(None, EngineConfig::default());
    let (workflow, approval) = launch(&mut core)?;

    let step = core.cancel_job(workflow, Utc::now())?;
    // The approval job never reached the backend.
    assert!(step.canceled_jobs().is_empty());

    assert_eq!(
        core.job(approval).map(|j| j.status),
        Some(JobStatus::Canceled)
    );
    assert_eq!(
        core.job(workflow).map(|j| j.status),
        Some(JobStatus::Canceled)
    );
    assert_eq!(
        core.workflow(workflow)
            .and_then(|wf| wf.gate("gate"))
            .and_then(|g| g.decision()),
        Some(ApprovalDecision::Canceled)
    );
    Ok(())
}
