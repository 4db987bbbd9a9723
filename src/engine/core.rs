// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s (or direct API calls) and produces:
//! - an updated job store and workflow state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending launch and cancel requests to the backend
//! - delivering notifications
//! - handling Ctrl+C / shutdown
//!
//! The core is unit tested without any Tokio, channels, or processes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::event_handlers::{CoreCommand, CoreStep};
use crate::engine::queue::{LaunchQueue, QueuedLaunch};
use crate::engine::{LaunchRequest, RuntimeEvent, RuntimeOptions};
use crate::errors::{Result, TowerflowError};
use crate::job::{
    ExtraVars, JobLaunchConfig, JobStatus, JobStore, LaunchOverrides, UnifiedJob, UnifiedJobKind,
    UnifiedJobTemplate,
};
use crate::types::{JobId, LaunchType};
use crate::workflow::{LaunchPrompts, LaunchSnapshot, TemplateRegistry, WorkflowController};

/// Decision applied to an approval gate as soon as it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandingDecision {
    Approve,
    Deny,
}

/// Result of an operation that created a job.
#[derive(Debug, Clone)]
pub struct Launched {
    pub job_id: JobId,
    pub step: CoreStep,
}

/// Pure core runtime state.
///
/// This owns:
/// - the template registry (shared with whoever edits templates)
/// - the unified job store
/// - one controller per workflow job
/// - the launch queue
/// - engine settings and runtime options
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    pub(super) registry: TemplateRegistry,
    pub(super) jobs: JobStore,
    pub(super) workflows: BTreeMap<JobId, WorkflowController>,
    pub(super) queue: LaunchQueue,
    /// Requests handed to the backend, kept for relaunching plain jobs.
    pub(super) launched: BTreeMap<JobId, LaunchRequest>,
    /// Decisions for gates opened later, by node identifier.
    pub(super) standing_decisions: BTreeMap<String, StandingDecision>,
    pub(super) config: EngineConfig,
    pub(super) options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(registry: TemplateRegistry, config: EngineConfig, options: RuntimeOptions) -> Self {
        Self {
            registry,
            jobs: JobStore::new(),
            workflows: BTreeMap::new(),
            queue: LaunchQueue::new(),
            launched: BTreeMap::new(),
            standing_decisions: BTreeMap::new(),
            config,
            options,
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn job(&self, id: JobId) -> Option<&UnifiedJob> {
        self.jobs.get(id)
    }

    pub fn workflow(&self, workflow_job: JobId) -> Option<&WorkflowController> {
        self.workflows.get(&workflow_job)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// No job is active and nothing is queued.
    pub fn is_idle(&self) -> bool {
        !self.jobs.has_active_jobs() && self.queue.is_empty()
    }

    /// Expose queue emptiness (for tests).
    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Approve or deny every approval node named `identifier` the moment its
    /// gate opens, in any workflow job this core runs.
    pub fn decide_when_opened(&mut self, identifier: impl Into<String>, decision: StandingDecision) {
        let identifier = identifier.into();
        debug!(node = %identifier, ?decision, "standing approval decision recorded");
        self.standing_decisions.insert(identifier, decision);
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    ///
    /// Errors are logged and swallowed here; callers that need them use the
    /// API methods directly.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let now = Utc::now();
        let result = match event {
            RuntimeEvent::LaunchWorkflow { template, prompts } => self
                .launch_workflow(&template, prompts, now)
                .map(|l| l.step),
            RuntimeEvent::JobStarted { job_id } => self.job_started(job_id, now),
            RuntimeEvent::JobFinished {
                job_id,
                status,
                artifacts,
            } => self.job_finished(job_id, status, artifacts, now),
            RuntimeEvent::Approve { job_id } => self.approve(job_id, now),
            RuntimeEvent::Deny { job_id } => self.deny(job_id, now),
            RuntimeEvent::CancelJob { job_id } => self.cancel_job(job_id, now),
            RuntimeEvent::ApprovalTick { now } => self.expire_approvals(now),
            RuntimeEvent::ShutdownRequested => {
                return CoreStep {
                    commands: Vec::new(),
                    keep_running: false,
                };
            }
        };

        let mut step = result.unwrap_or_else(|err| {
            warn!(error = %err, "runtime event rejected");
            CoreStep::default()
        });

        // In one-shot mode, we can exit once something ran and nothing is
        // active or queued any more.
        if self.options.exit_when_idle && !self.jobs.is_empty() && self.is_idle() {
            step.commands.push(CoreCommand::RequestExit);
            step.keep_running = false;
        }
        step
    }

    /// Launch a workflow job from a registered template.
    pub fn launch_workflow(
        &mut self,
        template: &str,
        prompts: LaunchPrompts,
        now: DateTime<Utc>,
    ) -> Result<Launched> {
        self.ensure_workflows_enabled()?;
        let snapshot = self.registry.snapshot_for_launch(template, &prompts)?;
        self.create_workflow_job(snapshot, LaunchType::Manual, now)
    }

    /// Launch a single unified job outside any workflow.
    pub fn launch_job(
        &mut self,
        template: &UnifiedJobTemplate,
        overrides: &LaunchOverrides,
        now: DateTime<Utc>,
    ) -> Result<Launched> {
        if template.is_approval() {
            return Err(TowerflowError::Validation(format!(
                "approval template '{}' can only run inside a workflow",
                template.name
            )));
        }

        if let Some(workflow) = template.nested_workflow() {
            return Err(TowerflowError::Validation(format!(
                "template '{}' runs workflow '{workflow}'; launch the workflow instead",
                template.name
            )));
        }

        let kind = template.job_kind(overrides);
        self.launch_standalone(
            template.name.clone(),
            Some(template.name.clone()),
            kind,
            template.cmd.clone(),
            overrides,
            now,
        )
    }

    /// Launch an ad hoc command: a module run against an inventory without
    /// any template.
    pub fn launch_ad_hoc_command(
        &mut self,
        module_name: &str,
        module_args: &str,
        cmd: Option<String>,
        overrides: &LaunchOverrides,
        now: DateTime<Utc>,
    ) -> Result<Launched> {
        if module_name.trim().is_empty() {
            return Err(TowerflowError::Validation(
                "ad hoc command needs a module name".to_string(),
            ));
        }
        let kind = UnifiedJobKind::AdHocCommand {
            module_name: module_name.to_string(),
            module_args: module_args.to_string(),
        };
        self.launch_standalone(module_name.to_string(), None, kind, cmd, overrides, now)
    }

    fn launch_standalone(
        &mut self,
        name: String,
        template: Option<String>,
        kind: UnifiedJobKind,
        cmd: Option<String>,
        overrides: &LaunchOverrides,
        now: DateTime<Utc>,
    ) -> Result<Launched> {
        let config = JobLaunchConfig::from_overrides(overrides);
        let job_id = self.jobs.create(
            name.clone(),
            kind.clone(),
            LaunchType::Manual,
            config.clone(),
            None,
        );
        if let Some(job) = self.jobs.get_mut(job_id) {
            job.template = template;
        }

        let request = LaunchRequest {
            job_id,
            name,
            kind,
            cmd,
            config,
        };
        let commands = self.dispatch(vec![request], now)?;
        Ok(Launched {
            job_id,
            step: CoreStep::with_commands(commands),
        })
    }

    /// Approve the approval job `job_id`.
    pub fn approve(&mut self, job_id: JobId, now: DateTime<Utc>) -> Result<CoreStep> {
        let (workflow_job, identifier) = self.approval_target(job_id)?;
        let resolution = self.controller_mut(workflow_job)?.approve(&identifier)?;
        let commands = self.finish_job(resolution.job, resolution.status, ExtraVars::new(), now)?;
        Ok(CoreStep::with_commands(commands))
    }

    /// Deny the approval job `job_id`.
    pub fn deny(&mut self, job_id: JobId, now: DateTime<Utc>) -> Result<CoreStep> {
        let (workflow_job, identifier) = self.approval_target(job_id)?;
        let resolution = self.controller_mut(workflow_job)?.deny(&identifier)?;
        let commands = self.finish_job(resolution.job, resolution.status, ExtraVars::new(), now)?;
        Ok(CoreStep::with_commands(commands))
    }

    /// Deny every approval whose deadline has passed.
    pub fn expire_approvals(&mut self, now: DateTime<Utc>) -> Result<CoreStep> {
        let expired: Vec<_> = self
            .workflows
            .values_mut()
            .filter(|wf| !wf.is_done())
            .flat_map(|wf| wf.expire_approvals(now))
            .collect();

        let mut commands = Vec::new();
        for resolution in expired {
            if let Some(job) = self.jobs.get_mut(resolution.job) {
                job.explain("The approval node timed out.");
            }
            commands.extend(self.finish_job(
                resolution.job,
                resolution.status,
                ExtraVars::new(),
                now,
            )?);
        }
        Ok(CoreStep::with_commands(commands))
    }

    /// Cancel any job.
    ///
    /// - A queued workflow launch is dropped and canceled on the spot.
    /// - A running workflow job skips its remaining nodes and cancels its
    ///   children; it becomes `canceled` once they are all terminal.
    /// - A plain job that has not started is canceled on the spot; a running
    ///   one is handed to the backend to stop.
    pub fn cancel_job(&mut self, job_id: JobId, now: DateTime<Utc>) -> Result<CoreStep> {
        let job = self.jobs.get(job_id).ok_or(TowerflowError::JobNotFound(job_id))?;
        if !job.can_cancel() {
            return Err(TowerflowError::Validation(format!(
                "job {} cannot be canceled in status {}",
                job_id, job.status
            )));
        }

        if job.kind.is_workflow() {
            if self.queue.remove(job_id) {
                self.jobs.request_cancel(job_id, now)?;
                info!(job_id = %job_id, "canceled queued workflow launch");
                return Ok(CoreStep::default());
            }
            let commands = self.cancel_workflow(job_id, now)?;
            return Ok(CoreStep::with_commands(commands));
        }

        let commands = self.cancel_child(job_id, now)?;
        Ok(CoreStep::with_commands(commands))
    }

    /// Cancel a started workflow job and, through its controller, every
    /// child job including nested workflow jobs.
    pub(super) fn cancel_workflow(
        &mut self,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoreCommand>> {
        self.jobs.request_cancel(job_id, now)?;
        if !self.workflows.contains_key(&job_id) {
            // Never got a controller; the cancel above already finished it.
            return Ok(Vec::new());
        }
        let step = self.controller_mut(job_id)?.cancel();
        self.apply_controller_step(job_id, step, now)
    }

    /// Create a fresh job from a finished one, sharing its template and
    /// launch configuration.
    pub fn relaunch(&mut self, job_id: JobId, now: DateTime<Utc>) -> Result<Launched> {
        let job = self.jobs.get(job_id).ok_or(TowerflowError::JobNotFound(job_id))?;
        if job.is_active() || job.status == JobStatus::New {
            return Err(TowerflowError::Validation(format!(
                "job {} is {} and cannot be relaunched yet",
                job_id, job.status
            )));
        }

        if job.spawned_by.is_some() || job.kind.is_approval() {
            return Err(TowerflowError::Validation(format!(
                "job {job_id} was spawned by a workflow; relaunch the workflow job instead"
            )));
        }

        if job.kind.is_workflow() {
            self.ensure_workflows_enabled()?;
            let controller = self
                .workflows
                .get(&job_id)
                .ok_or(TowerflowError::JobNotFound(job_id))?;
            let allow_simultaneous = self
                .registry
                .with_template(controller.name(), |t| t.allow_simultaneous)
                .unwrap_or(false);
            let snapshot = LaunchSnapshot {
                name: controller.name().to_string(),
                graph: controller.graph().clone(),
                launch: controller.launch().clone(),
                allow_simultaneous,
            };
            return self.create_workflow_job(snapshot, LaunchType::Relaunch, now);
        }

        let original = self
            .launched
            .get(&job_id)
            .cloned()
            .ok_or(TowerflowError::JobNotFound(job_id))?;
        let template = job.template.clone();
        let new_id = self.jobs.create(
            original.name.clone(),
            original.kind.clone(),
            LaunchType::Relaunch,
            original.config.clone(),
            None,
        );
        if let Some(new_job) = self.jobs.get_mut(new_id) {
            new_job.template = template;
        }
        info!(job_id = %job_id, new_job_id = %new_id, "relaunching job");

        let request = LaunchRequest {
            job_id: new_id,
            ..original
        };
        let commands = self.dispatch(vec![request], now)?;
        Ok(Launched {
            job_id: new_id,
            step: CoreStep::with_commands(commands),
        })
    }

    /// Delete a finished job. Refused while the job, or the workflow job
    /// that spawned it, is active.
    pub fn delete_job(&mut self, job_id: JobId) -> Result<UnifiedJob> {
        let job = self.jobs.delete(job_id)?;
        self.workflows.remove(&job_id);
        self.launched.remove(&job_id);
        debug!(job_id = %job_id, "deleted job");
        Ok(job)
    }

    fn ensure_workflows_enabled(&self) -> Result<()> {
        if self.config.workflows_enabled {
            Ok(())
        } else {
            Err(TowerflowError::WorkflowsDisabled)
        }
    }

    /// Create the workflow job record and either start it or park it behind
    /// the active job of the same template.
    fn create_workflow_job(
        &mut self,
        snapshot: LaunchSnapshot,
        launch_type: LaunchType,
        now: DateTime<Utc>,
    ) -> Result<Launched> {
        let overrides = LaunchOverrides {
            extra_data: snapshot.launch.extra_vars.clone(),
            inventory: snapshot.launch.inventory.clone(),
            limit: snapshot.launch.limit.clone(),
            scm_branch: snapshot.launch.scm_branch.clone(),
            ..LaunchOverrides::default()
        };
        let job_id = self.jobs.create(
            snapshot.name.clone(),
            UnifiedJobKind::WorkflowJob {
                template: snapshot.name.clone(),
            },
            launch_type,
            JobLaunchConfig::from_overrides(&overrides),
            None,
        );
        if let Some(job) = self.jobs.get_mut(job_id) {
            job.template = Some(snapshot.name.clone());
        }
        self.jobs.signal_start(job_id, now)?;

        if !snapshot.allow_simultaneous && self.template_busy(&snapshot.name) {
            self.queue.push(QueuedLaunch { job_id, snapshot });
            return Ok(Launched {
                job_id,
                step: CoreStep::default(),
            });
        }

        let commands = self.start_workflow(job_id, snapshot, now)?;
        Ok(Launched {
            job_id,
            step: CoreStep::with_commands(commands),
        })
    }

    /// A workflow job of `template` is running or waiting in the queue.
    fn template_busy(&self, template: &str) -> bool {
        self.queue.has_queued(template)
            || self
                .workflows
                .values()
                .any(|wf| wf.name() == template && !wf.is_done())
    }

    pub(super) fn start_workflow(
        &mut self,
        job_id: JobId,
        snapshot: LaunchSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoreCommand>> {
        self.jobs.mark_running(job_id, now)?;
        let mut controller =
            WorkflowController::new(job_id, snapshot.name, snapshot.graph, snapshot.launch);
        let step = controller.start();
        self.workflows.insert(job_id, controller);
        self.apply_controller_step(job_id, step, now)
    }

    /// Start the workflow job a workflow node spawned. Missing templates,
    /// invalid launches and recursion fail the job instead of starting it.
    pub(super) fn start_spawned_workflow(
        &mut self,
        job_id: JobId,
        template: &str,
        config: &JobLaunchConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<CoreCommand>> {
        self.jobs.signal_start(job_id, now)?;

        let chain = self.spawn_chain(job_id);
        let snapshot = if chain.iter().skip(1).any(|name| name == template) {
            Err(format!(
                "Workflow Job spawned from workflow could not start because it would result \
                 in recursion (spawn order, most recent first: {})",
                chain.join(", ")
            ))
        } else {
            self.registry
                .snapshot_for_spawn(template, config)
                .map_err(|err| {
                    format!(
                        "Job spawned from workflow could not start because it was missing a \
                         related resource or its launch was invalid: {err}"
                    )
                })
        };

        match snapshot {
            Ok(snapshot) => {
                info!(job_id = %job_id, workflow = %template, "starting nested workflow job");
                self.start_workflow(job_id, snapshot, now)
            }
            Err(explanation) => {
                warn!(job_id = %job_id, workflow = %template, %explanation, "nested workflow not started");
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.explain(&explanation);
                }
                self.finish_job(job_id, JobStatus::Failed, ExtraVars::new(), now)
            }
        }
    }

    /// Workflow template names from `job_id` up through the workflow jobs
    /// that spawned it, most recent first.
    fn spawn_chain(&self, job_id: JobId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.jobs.get(job_id);
        while let Some(job) = current {
            if let UnifiedJobKind::WorkflowJob { template } = &job.kind {
                chain.push(template.clone());
            }
            current = job
                .spawned_by
                .filter(|s| s.workflow_job < job.id)
                .and_then(|s| self.jobs.get(s.workflow_job));
        }
        chain
    }

    /// `(workflow job, node identifier)` owning an approval job.
    fn approval_target(&self, job_id: JobId) -> Result<(JobId, String)> {
        let job = self.jobs.get(job_id).ok_or(TowerflowError::JobNotFound(job_id))?;
        let spawned_by = match (&job.kind, job.spawned_by) {
            (UnifiedJobKind::WorkflowApproval { .. }, Some(spawned_by)) => spawned_by,
            _ => {
                return Err(TowerflowError::Validation(format!(
                    "job {job_id} is not a workflow approval"
                )));
            }
        };
        let controller = self
            .workflows
            .get(&spawned_by.workflow_job)
            .ok_or(TowerflowError::JobNotFound(spawned_by.workflow_job))?;
        Ok((spawned_by.workflow_job, controller.graph().label(spawned_by.node)))
    }

    pub(super) fn controller_mut(&mut self, workflow_job: JobId) -> Result<&mut WorkflowController> {
        self.workflows
            .get_mut(&workflow_job)
            .ok_or(TowerflowError::JobNotFound(workflow_job))
    }
}
