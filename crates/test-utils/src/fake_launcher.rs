use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use towerflow::engine::{CoreCommand, CoreRuntime, CoreStep, LaunchRequest, RuntimeEvent};
use towerflow::exec::{BackendFuture, LaunchBackend};
use towerflow::job::{ExtraVars, JobStatus};
use towerflow::types::JobId;

/// Scripted outcomes keyed by job name. Unscripted jobs succeed with no
/// artifacts; held jobs start but never finish on their own.
#[derive(Debug, Clone, Default)]
pub struct Script {
    outcomes: HashMap<String, (JobStatus, ExtraVars)>,
    held: HashSet<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(self, name: &str) -> Self {
        self.finish(name, JobStatus::Failed, ExtraVars::new())
    }

    pub fn error(self, name: &str) -> Self {
        self.finish(name, JobStatus::Error, ExtraVars::new())
    }

    pub fn finish(mut self, name: &str, status: JobStatus, artifacts: ExtraVars) -> Self {
        self.outcomes.insert(name.to_string(), (status, artifacts));
        self
    }

    pub fn hold(mut self, name: &str) -> Self {
        self.held.insert(name.to_string());
        self
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.contains(name)
    }

    pub fn outcome(&self, name: &str) -> (JobStatus, ExtraVars) {
        self.outcomes
            .get(name)
            .cloned()
            .unwrap_or((JobStatus::Successful, ExtraVars::new()))
    }
}

/// Everything the fake backends saw.
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub launched: Vec<LaunchRequest>,
    pub canceled: Vec<JobId>,
}

impl Recorded {
    pub fn launched_names(&self) -> Vec<String> {
        self.launched.iter().map(|r| r.name.clone()).collect()
    }
}

/// Drive the core synchronously: every launch is started and finished per
/// `script`, and the commands that follow are processed until nothing is
/// left. Returns what was launched and canceled.
pub fn drive(core: &mut CoreRuntime, step: CoreStep, script: &Script) -> Recorded {
    let mut recorded = Recorded::default();
    let mut pending: VecDeque<CoreCommand> = step.commands.into();

    while let Some(command) = pending.pop_front() {
        match command {
            CoreCommand::Launch(requests) => {
                for request in requests {
                    recorded.launched.push(request.clone());
                    let now = Utc::now();
                    core.job_started(request.job_id, now)
                        .expect("job_started rejected");
                    if script.is_held(&request.name) {
                        continue;
                    }
                    let (status, artifacts) = script.outcome(&request.name);
                    let next = core
                        .job_finished(request.job_id, status, artifacts, now)
                        .expect("job_finished rejected");
                    pending.extend(next.commands);
                }
            }
            CoreCommand::Cancel(jobs) => {
                for job_id in jobs {
                    recorded.canceled.push(job_id);
                    let next = core
                        .job_finished(job_id, JobStatus::Canceled, ExtraVars::new(), Utc::now())
                        .expect("job_finished rejected");
                    pending.extend(next.commands);
                }
            }
            CoreCommand::Notify(_) | CoreCommand::RequestExit => {}
        }
    }
    recorded
}

/// A fake async launch backend that:
/// - records which jobs were launched and canceled
/// - immediately reports `JobStarted` and the scripted `JobFinished`
/// - reports `canceled` for cancel requests of held jobs.
pub struct FakeLauncher {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    script: Script,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeLauncher {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        script: Script,
        recorded: Arc<Mutex<Recorded>>,
    ) -> Self {
        Self {
            runtime_tx,
            script,
            recorded,
        }
    }
}

impl LaunchBackend for FakeLauncher {
    fn launch(&mut self, requests: Vec<LaunchRequest>) -> BackendFuture<'_> {
        let tx = self.runtime_tx.clone();
        let recorded = Arc::clone(&self.recorded);
        let script = self.script.clone();

        Box::pin(async move {
            for request in requests {
                {
                    let mut guard = recorded.lock().unwrap();
                    guard.launched.push(request.clone());
                }

                // Report through a task so the runtime loop is never blocked
                // on its own channel.
                let tx = tx.clone();
                let script = script.clone();
                tokio::spawn(async move {
                    let job_id = request.job_id;
                    let _ = tx.send(RuntimeEvent::JobStarted { job_id }).await;
                    if script.is_held(&request.name) {
                        return;
                    }
                    let (status, artifacts) = script.outcome(&request.name);
                    let _ = tx
                        .send(RuntimeEvent::JobFinished {
                            job_id,
                            status,
                            artifacts,
                        })
                        .await;
                });
            }
            Ok(())
        })
    }

    fn cancel(&mut self, jobs: Vec<JobId>) -> BackendFuture<'_> {
        let tx = self.runtime_tx.clone();
        let recorded = Arc::clone(&self.recorded);

        Box::pin(async move {
            for job_id in jobs {
                {
                    let mut guard = recorded.lock().unwrap();
                    guard.canceled.push(job_id);
                }
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = tx
                        .send(RuntimeEvent::JobFinished {
                            job_id,
                            status: JobStatus::Canceled,
                            artifacts: ExtraVars::new(),
                        })
                        .await;
                });
            }
            Ok(())
        })
    }
}
