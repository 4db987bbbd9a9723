// src/exec/executor_loop.rs

//! Main executor loop that manages running job processes.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::engine::{LaunchRequest, RuntimeEvent};
use crate::exec::job_runner::run_job;
use crate::types::JobId;

/// Message accepted by the executor loop.
#[derive(Debug)]
pub enum ExecutorMessage {
    Launch(LaunchRequest),
    Cancel(JobId),
}

/// Internal handle for a currently-running job process.
///
/// - `cancel` asks the runner to kill the process.
/// - `handle` is the Tokio task that is actually running the command.
struct ActiveJob {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what `ProcessLaunchBackend` forwards to. Each job
/// runs in its own Tokio task; a job id is launched at most once.
pub fn spawn_executor(runtime_tx: mpsc::Sender<RuntimeEvent>) -> mpsc::Sender<ExecutorMessage> {
    let (tx, mut rx) = mpsc::channel::<ExecutorMessage>(32);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<JobId, ActiveJob> = HashMap::new();

        while let Some(message) = rx.recv().await {
            active.retain(|_, job| !job.handle.is_finished());
            match message {
                ExecutorMessage::Launch(request) => {
                    handle_launch(request, &mut active, &runtime_tx);
                }
                ExecutorMessage::Cancel(job_id) => handle_cancel(job_id, &mut active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn handle_launch(
    request: LaunchRequest,
    active: &mut HashMap<JobId, ActiveJob>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let job_id = request.job_id;
    if active.contains_key(&job_id) {
        debug!(job_id = %job_id, "job already running; ignoring duplicate launch");
        return;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();

    let handle = tokio::spawn(async move {
        run_job(request, rt_tx, cancel_rx).await;
        debug!(job_id = %job_id, "job runner future finished");
    });

    active.insert(
        job_id,
        ActiveJob {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn handle_cancel(job_id: JobId, active: &mut HashMap<JobId, ActiveJob>) {
    let Some(existing) = active.get_mut(&job_id) else {
        debug!(job_id = %job_id, "cancel for job that is not running; nothing to stop");
        return;
    };

    info!(job_id = %job_id, "cancelling job process");
    match existing.cancel.take() {
        Some(cancel) => {
            if cancel.send(()).is_err() {
                debug!(job_id = %job_id, "process already finished while cancelling");
            }
        }
        None => debug!(job_id = %job_id, "cancel already sent"),
    }
}
