// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::LaunchBackend;
use crate::notify::NotificationSink;

use super::core::CoreRuntime;
use super::{CoreCommand, CoreStep, RuntimeEvent};

/// Drives the core in response to `RuntimeEvent`s, and delegates job
/// execution to a `LaunchBackend` and notification delivery to a
/// `NotificationSink`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. Events are handled one at a time, so every job status
/// transition is serialized through the core.
pub struct Runtime<B: LaunchBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    backend: B,
    notifier: Arc<dyn NotificationSink>,
}

impl<B: LaunchBackend> fmt::Debug for Runtime<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<B: LaunchBackend> Runtime<B> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        backend: B,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            core,
            event_rx,
            backend,
            notifier,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Ticks approval deadlines on the configured interval.
    /// - Feeds both into the core runtime.
    /// - Executes commands returned by the core (launch, cancel, notify, exit).
    ///
    /// Returns the core so callers can inspect final job states.
    pub async fn run(self) -> Result<CoreRuntime> {
        self.run_from(CoreStep::default()).await
    }

    /// Like [`run`](Self::run), executing `initial` (typically the step of
    /// a launch made directly on the core) before reading any event.
    pub async fn run_from(mut self, initial: CoreStep) -> Result<CoreRuntime> {
        info!("towerflow runtime started");

        for command in initial.commands {
            self.execute_command(command).await?;
        }
        if !initial.keep_running {
            return Ok(self.core);
        }

        let period = self
            .core
            .config()
            .approval_check_interval
            .max(Duration::from_millis(10));
        let mut approvals = interval(period);
        approvals.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                received = self.event_rx.recv() => match received {
                    Some(e) => e,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
                _ = approvals.tick() => RuntimeEvent::ApprovalTick { now: Utc::now() },
            };

            if !matches!(event, RuntimeEvent::ApprovalTick { .. }) {
                debug!(?event, "runtime received event");
            }

            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!("runtime exiting");
        Ok(self.core)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Launch(requests) => {
                if !requests.is_empty() {
                    let ids: Vec<_> = requests.iter().map(|r| r.job_id.0).collect();
                    debug!(?ids, "launching jobs");
                    self.backend.launch(requests).await?;
                }
            }
            CoreCommand::Cancel(jobs) => {
                self.backend.cancel(jobs).await?;
            }
            CoreCommand::Notify(events) => {
                for event in &events {
                    self.notifier.notify(event);
                }
            }
            CoreCommand::RequestExit => {
                info!("core issued RequestExit command");
            }
        }
        Ok(())
    }
}
