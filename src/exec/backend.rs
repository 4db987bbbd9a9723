// src/exec/backend.rs

//! Pluggable launch backend abstraction.
//!
//! The runtime talks to a `LaunchBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake backend in tests while keeping the
//! production process executor in [`executor_loop`](super::executor_loop).
//!
//! - `ProcessLaunchBackend` is the default implementation. It wraps the
//!   executor loop and forwards launch and cancel requests over a channel.
//! - Tests can provide their own `LaunchBackend` that, for example, records
//!   which jobs were launched and directly emits `JobFinished` events.

use std::future::Future;
use std::pin::Pin;

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::engine::{LaunchRequest, RuntimeEvent};
use crate::errors::Result;
use crate::types::JobId;

use super::executor_loop::{spawn_executor, ExecutorMessage};

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Trait abstracting how jobs are executed.
///
/// Implementations report back through `RuntimeEvent::JobStarted` and
/// `RuntimeEvent::JobFinished`.
pub trait LaunchBackend: Send {
    /// Start the given jobs.
    fn launch(&mut self, requests: Vec<LaunchRequest>) -> BackendFuture<'_>;

    /// Ask the backend to stop the given jobs. Jobs it does not know about
    /// are ignored.
    fn cancel(&mut self, jobs: Vec<JobId>) -> BackendFuture<'_>;
}

/// Backend that runs each job's command as a local process.
pub struct ProcessLaunchBackend {
    tx: mpsc::Sender<ExecutorMessage>,
}

impl ProcessLaunchBackend {
    /// Create the backend, wiring it to the given runtime event sender.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let tx = spawn_executor(runtime_tx);
        Self { tx }
    }

    fn send_all(&self, messages: Vec<ExecutorMessage>) -> BackendFuture<'_> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for message in messages {
                tx.send(message)
                    .await
                    .map_err(|_| anyhow!("executor loop has stopped"))?;
            }
            Ok(())
        })
    }
}

impl LaunchBackend for ProcessLaunchBackend {
    fn launch(&mut self, requests: Vec<LaunchRequest>) -> BackendFuture<'_> {
        self.send_all(requests.into_iter().map(ExecutorMessage::Launch).collect())
    }

    fn cancel(&mut self, jobs: Vec<JobId>) -> BackendFuture<'_> {
        self.send_all(jobs.into_iter().map(ExecutorMessage::Cancel).collect())
    }
}
