// src/job/store.rs

//! In-memory unified job store.
//!
//! Every status change goes through here so the transition table, cancel
//! precedence and deletion guards are applied in one place.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::{Result, TowerflowError};
use crate::job::launch_config::{ExtraVars, JobLaunchConfig};
use crate::job::status::JobStatus;
use crate::job::unified::{SpawnedBy, UnifiedJob, UnifiedJobKind};
use crate::types::{JobId, LaunchType};

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job had not started executing and is now `canceled`.
    CanceledImmediately,
    /// The job is running; the executor has to observe the flag and stop it.
    Requested,
    /// A cancel request was already recorded earlier.
    AlreadyRequested,
    /// The job is no longer cancelable.
    NotCancelable,
}

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: BTreeMap<JobId, UnifiedJob>,
    next_id: u64,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job in state `new`.
    pub fn create(
        &mut self,
        name: impl Into<String>,
        kind: UnifiedJobKind,
        launch_type: LaunchType,
        launch_config: JobLaunchConfig,
        spawned_by: Option<SpawnedBy>,
    ) -> JobId {
        self.next_id += 1;
        let id = JobId(self.next_id);
        let mut job = UnifiedJob::new(id, name, kind, launch_type, launch_config);
        job.spawned_by = spawned_by;
        debug!(job_id = %id, name = %job.name, kind = job.kind.type_name(), "created unified job");
        self.jobs.insert(id, job);
        id
    }

    pub fn get(&self, id: JobId) -> Option<&UnifiedJob> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut UnifiedJob> {
        self.jobs.get_mut(&id)
    }

    pub fn status_of(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.get(&id).map(|j| j.status)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &UnifiedJob> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether any job is still pending, waiting or running.
    pub fn has_active_jobs(&self) -> bool {
        self.jobs.values().any(|j| j.is_active())
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut UnifiedJob> {
        self.jobs.get_mut(&id).ok_or(TowerflowError::JobNotFound(id))
    }

    /// Raw transition through the monotonic table.
    pub fn transition(&mut self, id: JobId, to: JobStatus, now: DateTime<Utc>) -> Result<()> {
        let job = self.job_mut(id)?;
        let from = job.status;
        job.transition_to(to, now)?;
        debug!(job_id = %id, %from, %to, "job status transition");
        Ok(())
    }

    /// Move a `new` job to `pending`. Fails when the job was already started.
    pub fn signal_start(&mut self, id: JobId, now: DateTime<Utc>) -> Result<()> {
        let job = self.job_mut(id)?;
        if !job.can_start() {
            return Err(TowerflowError::InvalidStateTransition {
                job: id,
                from: job.status,
                to: JobStatus::Pending,
            });
        }
        job.transition_to(JobStatus::Pending, now)
    }

    /// Record that the executor picked the job up.
    ///
    /// Jobs canceled while queued stay canceled; the report is ignored.
    pub fn mark_running(&mut self, id: JobId, now: DateTime<Utc>) -> Result<bool> {
        let job = self.job_mut(id)?;
        if job.status.is_terminal() {
            debug!(job_id = %id, status = %job.status, "ignoring start report for finished job");
            return Ok(false);
        }
        if job.status == JobStatus::Running {
            return Ok(false);
        }
        job.transition_to(JobStatus::Running, now)?;
        Ok(true)
    }

    /// Record the terminal status reported by the executor.
    ///
    /// Once a cancel was requested the stored status is `canceled` whatever
    /// the executor reports. Returns the status actually stored.
    pub fn finish(
        &mut self,
        id: JobId,
        reported: JobStatus,
        artifacts: ExtraVars,
        now: DateTime<Utc>,
    ) -> Result<JobStatus> {
        let job = self.job_mut(id)?;

        if !reported.is_terminal() {
            return Err(TowerflowError::InvalidStateTransition {
                job: id,
                from: job.status,
                to: reported,
            });
        }

        let target = if job.cancel_flag {
            if reported != JobStatus::Canceled {
                info!(
                    job_id = %id,
                    %reported,
                    "cancel was requested; recording job as canceled"
                );
            }
            JobStatus::Canceled
        } else {
            reported
        };

        job.transition_to(target, now)?;
        job.artifacts = artifacts;
        Ok(target)
    }

    /// Request cancellation.
    ///
    /// Jobs that have not started executing are canceled on the spot; running
    /// jobs only get their flag set and finish when the executor reports.
    pub fn request_cancel(&mut self, id: JobId, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let job = self.job_mut(id)?;

        if !job.can_cancel() {
            return Ok(CancelOutcome::NotCancelable);
        }
        if job.cancel_flag {
            return Ok(CancelOutcome::AlreadyRequested);
        }

        job.cancel_flag = true;
        if job.status == JobStatus::Running {
            info!(job_id = %id, "cancel requested for running job");
            Ok(CancelOutcome::Requested)
        } else {
            job.transition_to(JobStatus::Canceled, now)?;
            info!(job_id = %id, "job canceled before it started running");
            Ok(CancelOutcome::CanceledImmediately)
        }
    }

    /// Delete a job unless it, or the workflow job that spawned it, is
    /// still active.
    pub fn delete(&mut self, id: JobId) -> Result<UnifiedJob> {
        let job = self.jobs.get(&id).ok_or(TowerflowError::JobNotFound(id))?;

        if job.is_active() {
            return Err(TowerflowError::DeleteRefused {
                job: id,
                reason: format!("job is {}", job.status),
            });
        }

        if let Some(spawned_by) = job.spawned_by {
            if let Some(parent) = self.jobs.get(&spawned_by.workflow_job) {
                if parent.is_active() {
                    return Err(TowerflowError::DeleteRefused {
                        job: id,
                        reason: format!(
                            "workflow job {} that spawned it is {}",
                            parent.id, parent.status
                        ),
                    });
                }
            }
        }

        match self.jobs.remove(&id) {
            Some(job) => Ok(job),
            None => {
                warn!(job_id = %id, "job vanished during delete");
                Err(TowerflowError::JobNotFound(id))
            }
        }
    }
}
