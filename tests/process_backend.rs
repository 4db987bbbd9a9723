#![cfg(unix)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use towerflow::config::EngineConfig;
use towerflow::engine::{CoreRuntime, LaunchRequest, Runtime, RuntimeEvent, RuntimeOptions};
use towerflow::exec::job_runner::run_job;
use towerflow::exec::ProcessLaunchBackend;
use towerflow::graph::NodeSpec;
use towerflow::job::{ExtraVars, JobLaunchConfig, JobStatus, LaunchOverrides, UnifiedJobKind};
use towerflow::notify::TracingNotifier;
use towerflow::types::JobId;
use towerflow::workflow::{LaunchPrompts, TemplateRegistry};
use towerflow_test_utils::builders::{job_template, vars, WorkflowBuilder};
use towerflow_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn request(cmd: Option<&str>, overrides: LaunchOverrides) -> LaunchRequest {
    LaunchRequest {
        job_id: JobId(7),
        name: "smoke".to_string(),
        kind: UnifiedJobKind::Job {
            playbook: "smoke.yml".to_string(),
        },
        cmd: cmd.map(str::to_string),
        config: JobLaunchConfig::from_overrides(&overrides),
    }
}

/// Run one request to completion and return the finished report.
async fn run_to_end(
    request: LaunchRequest,
    cancel_after: Option<Duration>,
) -> Result<(JobStatus, ExtraVars), Box<dyn Error>> {
    let (tx, mut rx) = mpsc::channel(8);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    tokio::spawn(run_job(request, tx, cancel_rx));

    match rx.recv().await {
        Some(RuntimeEvent::JobStarted { job_id }) => assert_eq!(job_id, JobId(7)),
        other => return Err(format!("expected JobStarted, got {other:?}").into()),
    }

    // Dropping the sender cancels too, so it lives until the report.
    if let Some(delay) = cancel_after {
        tokio::time::sleep(delay).await;
        let _ = cancel_tx.send(());
    }

    match rx.recv().await {
        Some(RuntimeEvent::JobFinished {
            status, artifacts, ..
        }) => Ok((status, artifacts)),
        other => Err(format!("expected JobFinished, got {other:?}").into()),
    }
}

#[tokio::test]
async fn request_without_command_succeeds() -> TestResult {
    init_tracing();
    with_timeout(async {
        let (status, artifacts) = run_to_end(request(None, LaunchOverrides::default()), None).await?;
        assert_eq!(status, JobStatus::Successful);
        assert!(artifacts.is_empty());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn process_sees_launch_config_and_publishes_artifacts() -> TestResult {
    init_tracing();
    with_timeout(async {
        let overrides = LaunchOverrides {
            limit: Some("web".to_string()),
            extra_data: vars(json!({ "region": "eu" })),
            credentials: vec!["ssh-prod".to_string(), "vault".to_string()],
            ..LaunchOverrides::default()
        };
        let cmd = r#"echo "TOWERFLOW_ARTIFACTS {\"limit\": \"$TOWERFLOW_LIMIT\", \"job\": $TOWERFLOW_JOB_ID, \"type\": \"$TOWERFLOW_JOB_TYPE\", \"credentials\": \"$TOWERFLOW_CREDENTIALS\"}"
echo "$TOWERFLOW_EXTRA_VARS" | grep -q '"region":"eu"'"#;

        let (status, artifacts) = run_to_end(request(Some(cmd), overrides), None).await?;
        assert_eq!(status, JobStatus::Successful);
        assert_eq!(
            artifacts,
            vars(json!({
                "limit": "web",
                "job": 7,
                "type": "job",
                "credentials": "ssh-prod,vault"
            }))
        );
        Ok(())
    })
    .await
}

#[tokio::test]
async fn non_zero_exit_is_failed() -> TestResult {
    init_tracing();
    with_timeout(async {
        let cmd = "echo 'TOWERFLOW_ARTIFACTS not-json'; exit 3";
        let (status, artifacts) =
            run_to_end(request(Some(cmd), LaunchOverrides::default()), None).await?;
        assert_eq!(status, JobStatus::Failed);
        assert!(artifacts.is_empty());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn cancel_kills_the_process() -> TestResult {
    init_tracing();
    with_timeout(async {
        let (status, _) = run_to_end(
            request(Some("sleep 30"), LaunchOverrides::default()),
            Some(Duration::from_millis(100)),
        )
        .await?;
        assert_eq!(status, JobStatus::Canceled);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn workflow_runs_real_processes_and_passes_artifacts() -> TestResult {
    init_tracing();
    with_timeout(async {
        let template = WorkflowBuilder::new("wf")
            .node(NodeSpec::new(
                "emit",
                job_template("emit").with_cmd(r#"echo 'TOWERFLOW_ARTIFACTS {"build_id": 42}'"#),
            ))
            .node(NodeSpec::new(
                "check",
                job_template("check")
                    .with_cmd(r#"echo "$TOWERFLOW_EXTRA_VARS" | grep -q '"build_id":42'"#),
            ))
            .node(NodeSpec::new(
                "on_fail",
                job_template("on_fail").with_cmd("exit 1"),
            ))
            .success("emit", "check")
            .failure("check", "on_fail")
            .build();

        let registry = TemplateRegistry::new();
        registry.insert(template)?;
        let options = RuntimeOptions {
            exit_when_idle: true,
            ..RuntimeOptions::default()
        };
        let mut core = CoreRuntime::new(registry, EngineConfig::default(), options);
        let launched = core.launch_workflow("wf", LaunchPrompts::default(), Utc::now())?;

        let (tx, rx) = mpsc::channel(64);
        let backend = ProcessLaunchBackend::new(tx.clone());
        let runtime = Runtime::new(core, rx, backend, Arc::new(TracingNotifier));
        let core = runtime.run_from(launched.step).await?;

        assert_eq!(
            core.job(launched.job_id).map(|j| j.status),
            Some(JobStatus::Successful)
        );
        let controller = core.workflow(launched.job_id).ok_or("controller")?;
        let check = controller.job_of("check").ok_or("check job")?;
        assert_eq!(core.job(check).map(|j| j.status), Some(JobStatus::Successful));
        assert!(controller.job_of("on_fail").is_none());
        Ok(())
    })
    .await
}
