// src/engine/event_handlers.rs

//! Event handling logic for the core runtime: backend reports, controller
//! decisions and the job store bookkeeping that follows from them.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::engine::core::{CoreRuntime, StandingDecision};
use crate::engine::LaunchRequest;
use crate::errors::Result;
use crate::job::{CancelOutcome, ExtraVars, JobStatus, SpawnedBy, UnifiedJobKind};
use crate::notify::NotificationEvent;
use crate::types::{JobId, LaunchType};
use crate::workflow::ControllerStep;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Hand these jobs to the launch backend.
    Launch(Vec<LaunchRequest>),
    /// Ask the backend to stop these jobs.
    Cancel(Vec<JobId>),
    /// Deliver these notifications.
    Notify(Vec<NotificationEvent>),
    /// Request that the process exits (used for one-shot runs when idle).
    RequestExit,
}

/// Decision returned by the core after handling a single event or call.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl Default for CoreStep {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: true,
        }
    }
}

impl CoreStep {
    pub fn with_commands(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    /// Jobs handed to the backend in this step.
    pub fn launched_jobs(&self) -> Vec<JobId> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Launch(requests) => Some(requests.iter().map(|r| r.job_id)),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Jobs the backend was asked to stop in this step.
    pub fn canceled_jobs(&self) -> Vec<JobId> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Cancel(jobs) => Some(jobs.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn notifications(&self) -> Vec<&NotificationEvent> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Notify(events) => Some(events.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl CoreRuntime {
    /// Handle a "job started" report from the backend.
    pub fn job_started(&mut self, job_id: JobId, now: DateTime<Utc>) -> Result<CoreStep> {
        if self.jobs.mark_running(job_id, now)? {
            debug!(job_id = %job_id, "job running");
        }
        Ok(CoreStep::default())
    }

    /// Handle a "job finished" report from the backend.
    ///
    /// Reports for jobs that already reached a terminal state (for example
    /// jobs canceled before they started) are ignored.
    pub fn job_finished(
        &mut self,
        job_id: JobId,
        status: JobStatus,
        artifacts: ExtraVars,
        now: DateTime<Utc>,
    ) -> Result<CoreStep> {
        if self.jobs.status_of(job_id).is_some_and(JobStatus::is_terminal) {
            debug!(job_id = %job_id, %status, "ignoring report for finished job");
            return Ok(CoreStep::default());
        }
        let commands = self.finish_job(job_id, status, artifacts, now)?;
        Ok(CoreStep::with_commands(commands))
    }

    /// Store a terminal status and run everything that follows from it.
    pub(super) fn finish_job(
        &mut self,
        job_id: JobId,
        reported: JobStatus,
        artifacts: ExtraVars,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoreCommand>> {
        let stored = self.jobs.finish(job_id, reported, artifacts.clone(), now)?;
        self.after_terminal(job_id, stored, artifacts, now)
    }

    /// Notify, then let the owning workflow react.
    fn after_terminal(
        &mut self,
        job_id: JobId,
        status: JobStatus,
        artifacts: ExtraVars,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoreCommand>> {
        let mut commands = Vec::new();
        let spawned_by = match self.jobs.get(job_id) {
            Some(job) => {
                info!(job_id = %job_id, name = %job.name, %status, "job finished");
                if let Some(event) = NotificationEvent::for_job(job) {
                    commands.push(CoreCommand::Notify(vec![event]));
                }
                job.spawned_by
            }
            None => None,
        };

        if let Some(SpawnedBy { workflow_job, node }) = spawned_by {
            if let Some(controller) = self.workflows.get_mut(&workflow_job) {
                let step = controller.node_finished(node, status, artifacts)?;
                commands.extend(self.apply_controller_step(workflow_job, step, now)?);
            }
        }
        Ok(commands)
    }

    /// Turn a controller decision into jobs, cancellations and, once the
    /// workflow is done, its final status.
    pub(super) fn apply_controller_step(
        &mut self,
        workflow_job: JobId,
        step: ControllerStep,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoreCommand>> {
        let mut commands = Vec::new();
        let mut requests = Vec::new();
        let mut nested = Vec::new();
        let mut decided = Vec::new();

        for launch in step.newly_launched {
            let job_id = self.jobs.create(
                launch.template.name.clone(),
                launch.kind.clone(),
                LaunchType::Workflow,
                launch.config.clone(),
                Some(SpawnedBy {
                    workflow_job,
                    node: launch.node,
                }),
            );
            if let Some(job) = self.jobs.get_mut(job_id) {
                job.template = Some(launch.template.name.clone());
            }
            self.controller_mut(workflow_job)?.bind_job(launch.node, job_id)?;

            match &launch.kind {
                UnifiedJobKind::WorkflowApproval { timeout } => {
                    let timeout = (*timeout).or(self.config.approval_default_timeout);
                    self.jobs.signal_start(job_id, now)?;
                    self.controller_mut(workflow_job)?
                        .open_approval(launch.node, job_id, now, timeout)?;
                    info!(
                        workflow_job = %workflow_job,
                        node = %launch.identifier,
                        job_id = %job_id,
                        "waiting for approval"
                    );
                    if let Some(decision) = self.standing_decisions.get(&launch.identifier) {
                        decided.push((job_id, *decision));
                    }
                }
                UnifiedJobKind::WorkflowJob { template } => {
                    nested.push((job_id, template.clone(), launch.config));
                }
                _ => requests.push(LaunchRequest {
                    job_id,
                    name: launch.template.name.clone(),
                    kind: launch.kind,
                    cmd: launch.template.cmd.clone(),
                    config: launch.config,
                }),
            }
        }

        if !requests.is_empty() {
            commands.extend(self.dispatch(requests, now)?);
        }

        // Nested workflows and pre-decided gates may finish on the spot and
        // re-enter this workflow, so they run after every launch is bound.
        for (job_id, template, config) in nested {
            commands.extend(self.start_spawned_workflow(job_id, &template, &config, now)?);
        }
        for (job_id, decision) in decided {
            let step = match decision {
                StandingDecision::Approve => self.approve(job_id, now)?,
                StandingDecision::Deny => self.deny(job_id, now)?,
            };
            commands.extend(step.commands);
        }

        for job_id in step.jobs_to_cancel {
            let is_workflow = self
                .jobs
                .get(job_id)
                .is_some_and(|job| job.kind.is_workflow());
            if is_workflow {
                commands.extend(self.cancel_workflow(job_id, now)?);
            } else {
                commands.extend(self.cancel_child(job_id, now)?);
            }
        }

        if let Some(status) = step.workflow_finished {
            commands.extend(self.finish_workflow(workflow_job, status, now)?);
        }

        Ok(commands)
    }

    /// Move dispatched jobs to `pending` and build the launch command.
    pub(super) fn dispatch(
        &mut self,
        requests: Vec<LaunchRequest>,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoreCommand>> {
        for request in &requests {
            self.jobs.signal_start(request.job_id, now)?;
            self.launched.insert(request.job_id, request.clone());
        }
        let names: Vec<_> = requests.iter().map(|r| r.name.as_str()).collect();
        debug!(?names, "dispatching jobs");
        Ok(vec![CoreCommand::Launch(requests)])
    }

    /// Cancel a non-workflow job.
    pub(super) fn cancel_child(
        &mut self,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoreCommand>> {
        let mut commands = Vec::new();
        match self.jobs.request_cancel(job_id, now)? {
            CancelOutcome::CanceledImmediately => {
                // The backend may already hold the request.
                if self.launched.contains_key(&job_id) {
                    commands.push(CoreCommand::Cancel(vec![job_id]));
                }
                commands.extend(self.after_terminal(
                    job_id,
                    JobStatus::Canceled,
                    ExtraVars::new(),
                    now,
                )?);
            }
            CancelOutcome::Requested => commands.push(CoreCommand::Cancel(vec![job_id])),
            CancelOutcome::AlreadyRequested | CancelOutcome::NotCancelable => {}
        }
        Ok(commands)
    }

    /// Record the final status of a workflow job and start the next queued
    /// launch of its template.
    fn finish_workflow(
        &mut self,
        workflow_job: JobId,
        status: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoreCommand>> {
        if status == JobStatus::Failed {
            if let Some(job) = self.jobs.get_mut(workflow_job) {
                job.explain("No error handling path for workflow job node(s).");
            }
        }
        let mut commands = self.finish_job(workflow_job, status, ExtraVars::new(), now)?;

        let template = self.workflows.get(&workflow_job).map(|wf| wf.name().to_string());
        if let Some(next) = template.and_then(|name| self.queue.pop(&name)) {
            info!(
                workflow = %next.snapshot.name,
                job_id = %next.job_id,
                "starting queued workflow job"
            );
            commands.extend(self.start_workflow(next.job_id, next.snapshot, now)?);
        }
        Ok(commands)
    }
}
