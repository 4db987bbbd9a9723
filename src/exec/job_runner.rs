// src/exec/job_runner.rs

//! Individual job process runner.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::{LaunchRequest, RuntimeEvent};
use crate::job::launch_config::merge_into;
use crate::job::{ExtraVars, JobStatus};

/// Stdout lines starting with this marker carry a JSON object of artifacts
/// for descendant nodes.
pub const ARTIFACTS_MARKER: &str = "TOWERFLOW_ARTIFACTS ";

/// Run a single job process, reporting `JobStarted` and then exactly one
/// `JobFinished`.
///
/// - A request without a command succeeds immediately.
/// - If the cancel channel fires the process is killed and the job is
///   reported as `canceled`.
/// - Failing to spawn or wait on the process reports `error`.
pub async fn run_job(
    request: LaunchRequest,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let job_id = request.job_id;
    let name = request.name.clone();

    if runtime_tx
        .send(RuntimeEvent::JobStarted { job_id })
        .await
        .is_err()
    {
        debug!(job_id = %job_id, "runtime gone before job start");
        return;
    }

    let (status, artifacts) = match run_job_inner(request, cancel_rx).await {
        Ok(done) => done,
        Err(err) => {
            error!(job_id = %job_id, job = %name, error = %err, "job execution error");
            (JobStatus::Error, ExtraVars::new())
        }
    };

    if runtime_tx
        .send(RuntimeEvent::JobFinished {
            job_id,
            status,
            artifacts,
        })
        .await
        .is_err()
    {
        warn!(job_id = %job_id, "runtime gone before job finished report");
    }
}

async fn run_job_inner(
    request: LaunchRequest,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<(JobStatus, ExtraVars)> {
    let Some(command) = request.cmd.as_deref() else {
        info!(
            job_id = %request.job_id,
            job = %request.name,
            kind = request.kind.type_name(),
            "no command configured; job succeeds without running anything"
        );
        return Ok((JobStatus::Successful, ExtraVars::new()));
    };

    info!(
        job_id = %request.job_id,
        job = %request.name,
        cmd = %command,
        "starting job process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    let extra_vars = serde_json::to_string(request.config.extra_vars())
        .context("serializing extra vars")?;
    cmd.env("TOWERFLOW_JOB_ID", request.job_id.to_string())
        .env("TOWERFLOW_JOB_TYPE", request.kind.type_name())
        .env("TOWERFLOW_EXTRA_VARS", extra_vars);
    for (key, value) in [
        ("TOWERFLOW_INVENTORY", request.config.inventory()),
        ("TOWERFLOW_LIMIT", request.config.limit()),
        ("TOWERFLOW_SCM_BRANCH", request.config.scm_branch()),
        ("TOWERFLOW_JOB_TAGS", request.config.job_tags()),
        ("TOWERFLOW_SKIP_TAGS", request.config.skip_tags()),
    ] {
        if let Some(value) = value {
            cmd.env(key, value);
        }
    }
    if !request.config.credentials().is_empty() {
        cmd.env("TOWERFLOW_CREDENTIALS", request.config.credentials().join(","));
    }

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for job '{}'", request.name))?;

    let stdout_reader = child.stdout.take().map(|stdout| {
        let job_id = request.job_id;
        tokio::spawn(async move {
            let mut artifacts = ExtraVars::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match line.strip_prefix(ARTIFACTS_MARKER) {
                    Some(payload) => match serde_json::from_str::<Value>(payload) {
                        Ok(Value::Object(published)) => merge_into(&mut artifacts, &published),
                        _ => warn!(%job_id, "ignoring malformed artifacts line"),
                    },
                    None => debug!(%job_id, "stdout: {}", line),
                }
            }
            artifacts
        })
    });

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let job_id = request.job_id;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(%job_id, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res.with_context(|| {
                format!("waiting for process of job '{}'", request.name)
            })?;

            let code = status.code().unwrap_or(-1);
            info!(
                job_id = %request.job_id,
                exit_code = code,
                success = status.success(),
                "job process exited"
            );

            let artifacts = match stdout_reader {
                Some(handle) => handle.await.unwrap_or_default(),
                None => ExtraVars::new(),
            };
            let job_status = if status.success() {
                JobStatus::Successful
            } else {
                JobStatus::Failed
            };
            Ok((job_status, artifacts))
        }

        cancel = &mut cancel_rx => {
            if let Err(e) = cancel {
                debug!(
                    job_id = %request.job_id,
                    error = %e,
                    "cancel channel closed without explicit cancellation"
                );
            }
            info!(job_id = %request.job_id, "killing job process");
            if let Err(e) = child.kill().await {
                warn!(
                    job_id = %request.job_id,
                    error = %e,
                    "failed to kill child process on cancellation"
                );
            }
            Ok((JobStatus::Canceled, ExtraVars::new()))
        }
    }
}
