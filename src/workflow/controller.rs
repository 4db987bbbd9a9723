// src/workflow/controller.rs

//! Workflow execution controller.
//!
//! One controller drives one workflow job. It owns a snapshot of the
//! template's graph plus per-node run state, and decides after every status
//! change which nodes launch next, which are skipped and when the workflow
//! job itself is done. It never touches the job store; the engine core binds
//! jobs to nodes and reports their outcomes back.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{Result, TowerflowError};
use crate::graph::NodeGraph;
use crate::job::launch_config::merge_into;
use crate::job::{ExtraVars, JobLaunchConfig, JobStatus};
use crate::types::{EdgeType, JobId, NodeId};
use crate::workflow::approval::{ApprovalGate, ApprovalResolution};
use crate::workflow::controller_step::{ControllerStep, NodeLaunch};
use crate::workflow::node_state::{EdgeState, NodeOutcome, NodeRunInfo, NodeRunState};
use crate::workflow::template::WorkflowLaunch;

/// What the evaluator decided for a not-started node.
enum Readiness {
    Wait,
    Launch,
    Skip,
}

#[derive(Debug, Clone)]
pub struct WorkflowController {
    workflow_job: JobId,
    name: String,
    graph: NodeGraph,
    launch: WorkflowLaunch,
    nodes: BTreeMap<NodeId, NodeRunInfo>,
    approvals: BTreeMap<NodeId, ApprovalGate>,
    cancel_requested: bool,
    started: bool,
    finished: Option<JobStatus>,
}

impl WorkflowController {
    /// Build a controller over a graph snapshot. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(
        workflow_job: JobId,
        name: impl Into<String>,
        graph: NodeGraph,
        launch: WorkflowLaunch,
    ) -> Self {
        let nodes = graph.node_ids().map(|id| (id, NodeRunInfo::new())).collect();
        Self {
            workflow_job,
            name: name.into(),
            graph,
            launch,
            nodes,
            approvals: BTreeMap::new(),
            cancel_requested: false,
            started: false,
            finished: None,
        }
    }

    pub fn workflow_job(&self) -> JobId {
        self.workflow_job
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn launch(&self) -> &WorkflowLaunch {
        &self.launch
    }

    pub fn state_of(&self, identifier: &str) -> Option<NodeRunState> {
        let id = self.graph.lookup(identifier)?;
        self.nodes.get(&id).map(|n| n.state)
    }

    pub fn node_info(&self, id: NodeId) -> Option<&NodeRunInfo> {
        self.nodes.get(&id)
    }

    pub fn job_of(&self, identifier: &str) -> Option<JobId> {
        let id = self.graph.lookup(identifier)?;
        self.nodes.get(&id).and_then(|n| n.job)
    }

    pub fn node_for_job(&self, job: JobId) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, info)| info.job == Some(job))
            .map(|(id, _)| *id)
    }

    pub fn gate(&self, identifier: &str) -> Option<&ApprovalGate> {
        let id = self.graph.lookup(identifier)?;
        self.approvals.get(&id)
    }

    /// Jobs currently bound to running or awaiting nodes.
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.nodes
            .values()
            .filter(|n| n.state.is_in_flight())
            .filter_map(|n| n.job)
            .collect()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn is_done(&self) -> bool {
        self.finished.is_some()
    }

    pub fn final_status(&self) -> Option<JobStatus> {
        self.finished
    }

    /// Begin the run: every root node becomes eligible.
    pub fn start(&mut self) -> ControllerStep {
        if self.started {
            warn!(workflow_job = %self.workflow_job, "workflow already started");
            return ControllerStep::default();
        }
        self.started = true;
        info!(
            workflow_job = %self.workflow_job,
            workflow = %self.name,
            nodes = self.graph.len(),
            "starting workflow job"
        );
        self.evaluate()
    }

    /// Attach the job created for a launched node.
    pub fn bind_job(&mut self, node: NodeId, job: JobId) -> Result<()> {
        let info = self.node_mut(node)?;
        if info.state != NodeRunState::Running || info.job.is_some() {
            return Err(TowerflowError::Validation(format!(
                "{node} is not waiting for a job"
            )));
        }
        info.job = Some(job);
        Ok(())
    }

    /// Open the approval gate for a launched approval node.
    pub fn open_approval(
        &mut self,
        node: NodeId,
        job: JobId,
        now: DateTime<Utc>,
        timeout: Option<Duration>,
    ) -> Result<&ApprovalGate> {
        let identifier = self.graph.label(node);
        let info = self.node_mut(node)?;
        if info.job != Some(job) {
            return Err(TowerflowError::Validation(format!(
                "approval job {job} is not bound to node '{identifier}'"
            )));
        }
        info.state = NodeRunState::AwaitingApproval;

        let gate = ApprovalGate::open(node, identifier, job, now, timeout);
        debug!(
            workflow_job = %self.workflow_job,
            node = %gate.identifier,
            deadline = ?gate.deadline,
            "approval gate opened"
        );
        Ok(self.approvals.entry(node).or_insert(gate))
    }

    /// Record the terminal status of a node's job and re-evaluate the DAG.
    pub fn node_finished(
        &mut self,
        node: NodeId,
        status: JobStatus,
        artifacts: ExtraVars,
    ) -> Result<ControllerStep> {
        let outcome = NodeOutcome::from_status(status).ok_or_else(|| {
            TowerflowError::Validation(format!("{status} is not a terminal status"))
        })?;

        let info = self.node_mut(node)?;
        if !info.state.is_in_flight() {
            return Err(TowerflowError::Validation(format!(
                "{node} has no job in flight"
            )));
        }
        info.state = NodeRunState::Done(outcome);
        info.final_status = Some(status);
        info.artifacts = artifacts;

        // The approval job was stopped from outside the gate.
        if let Some(gate) = self.approvals.get_mut(&node) {
            if gate.is_open() {
                let _ = gate.cancel();
            }
        }

        debug!(
            workflow_job = %self.workflow_job,
            node = %self.graph.label(node),
            %status,
            "workflow node finished"
        );
        Ok(self.evaluate())
    }

    pub fn approve(&mut self, identifier: &str) -> Result<ApprovalResolution> {
        self.gate_mut(identifier)?.approve()
    }

    pub fn deny(&mut self, identifier: &str) -> Result<ApprovalResolution> {
        self.gate_mut(identifier)?.deny()
    }

    /// Time out every open gate whose deadline has passed.
    pub fn expire_approvals(&mut self, now: DateTime<Utc>) -> Vec<ApprovalResolution> {
        let expired: Vec<_> = self
            .approvals
            .values_mut()
            .filter_map(|gate| gate.expire(now))
            .collect();
        for resolution in &expired {
            info!(
                workflow_job = %self.workflow_job,
                node = %self.graph.label(resolution.node),
                "approval timed out"
            );
        }
        expired
    }

    /// Cancel the workflow job: skip everything not yet started, and hand
    /// back the child jobs that have to be stopped.
    pub fn cancel(&mut self) -> ControllerStep {
        if self.finished.is_some() {
            return ControllerStep::default();
        }
        self.cancel_requested = true;
        info!(workflow_job = %self.workflow_job, "canceling workflow job");

        let mut step = ControllerStep::default();
        for gate in self.approvals.values_mut() {
            // Already-decided gates are just waiting for their job to finish.
            let _ = gate.cancel();
        }
        for info in self.nodes.values() {
            if info.state.is_in_flight() {
                if let Some(job) = info.job {
                    step.jobs_to_cancel.push(job);
                }
            }
        }
        step.merge(self.evaluate());
        step
    }

    /// Whether the run failed: a node failed with nothing to handle it, or a
    /// node had no template.
    pub fn has_failed(&self) -> bool {
        self.nodes.iter().any(|(id, info)| {
            if info.missing_template {
                return true;
            }
            info.state == NodeRunState::Done(NodeOutcome::Failure)
                && !self.graph.has_children(*id, EdgeType::Failure)
                && !self.graph.has_children(*id, EdgeType::Always)
        })
    }

    /// Run the DAG to a fixpoint: launch what became eligible, skip what can
    /// no longer run, and finish the workflow when nothing is left.
    pub fn evaluate(&mut self) -> ControllerStep {
        let mut step = ControllerStep::default();
        if !self.started || self.finished.is_some() {
            return step;
        }

        loop {
            let mut changed = false;
            let pending: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|(_, info)| info.state == NodeRunState::NotStarted)
                .map(|(id, _)| *id)
                .collect();

            for id in pending {
                let readiness = if self.cancel_requested {
                    Readiness::Skip
                } else {
                    self.readiness(id)
                };

                match readiness {
                    Readiness::Wait => {}
                    Readiness::Skip => {
                        self.set_state(id, NodeRunState::DoNotRun);
                        debug!(
                            workflow_job = %self.workflow_job,
                            node = %self.graph.label(id),
                            "workflow node will not run"
                        );
                        step.newly_skipped.push(id);
                        changed = true;
                    }
                    Readiness::Launch => {
                        changed = true;
                        match self.prepare_launch(id) {
                            Some(launch) => {
                                self.set_state(id, NodeRunState::Running);
                                step.newly_launched.push(launch);
                            }
                            None => {
                                warn!(
                                    workflow_job = %self.workflow_job,
                                    node = %self.graph.label(id),
                                    "workflow node has no unified job template; failing it"
                                );
                                if let Some(info) = self.nodes.get_mut(&id) {
                                    info.state = NodeRunState::Done(NodeOutcome::Failure);
                                    info.missing_template = true;
                                }
                                step.newly_failed.push(id);
                            }
                        }
                    }
                }
            }

            if !changed {
                break;
            }
        }

        if self.nodes.values().all(|n| n.state.is_resolved()) {
            let status = if self.cancel_requested {
                JobStatus::Canceled
            } else if self.has_failed() {
                JobStatus::Failed
            } else {
                JobStatus::Successful
            };
            info!(
                workflow_job = %self.workflow_job,
                workflow = %self.name,
                %status,
                "workflow job finished"
            );
            self.finished = Some(status);
            step.workflow_finished = Some(status);
        }

        step
    }

    fn readiness(&self, id: NodeId) -> Readiness {
        let parents = self.graph.parents_of(id);
        if parents.is_empty() {
            return Readiness::Launch;
        }

        let edges: Vec<EdgeState> = parents
            .iter()
            .map(|(parent, edge_type)| {
                let parent_state = self
                    .nodes
                    .get(parent)
                    .map(|n| n.state)
                    .unwrap_or(NodeRunState::DoNotRun);
                EdgeState::of(parent_state, *edge_type)
            })
            .collect();

        let converge = self
            .graph
            .node(id)
            .is_some_and(|n| n.all_parents_must_converge);

        if converge {
            if edges.contains(&EdgeState::Pending) {
                Readiness::Wait
            } else if edges.iter().all(|e| *e == EdgeState::Fired) {
                Readiness::Launch
            } else {
                Readiness::Skip
            }
        } else if edges.contains(&EdgeState::Fired) {
            Readiness::Launch
        } else if edges.iter().all(|e| *e == EdgeState::Dead) {
            Readiness::Skip
        } else {
            Readiness::Wait
        }
    }

    /// Resolve the job configuration for a node, or `None` when its
    /// template is missing.
    fn prepare_launch(&mut self, id: NodeId) -> Option<NodeLaunch> {
        let ancestor_artifacts = self.collect_ancestor_artifacts(id);
        let workflow_vars = self.workflow_vars();

        let spec = self.graph.node(id)?;
        let template = spec.unified_job_template.clone()?;
        let overrides = self.launch.apply_to(&spec.overrides);
        let kind = template.job_kind(&overrides);
        let config = JobLaunchConfig::for_node(&overrides, &ancestor_artifacts, &workflow_vars);
        let identifier = spec.identifier.clone();

        if let Some(info) = self.nodes.get_mut(&id) {
            info.ancestor_artifacts = ancestor_artifacts;
        }

        Some(NodeLaunch {
            node: id,
            identifier,
            template,
            kind,
            config,
        })
    }

    /// Artifacts of every finished parent, each layered over what that parent
    /// itself inherited. Parents are applied in node order.
    fn collect_ancestor_artifacts(&self, id: NodeId) -> ExtraVars {
        let mut merged = ExtraVars::new();
        let mut parents: Vec<NodeId> = self
            .graph
            .parents_of(id)
            .into_iter()
            .map(|(parent, _)| parent)
            .collect();
        parents.dedup();

        for parent in parents {
            if let Some(info) = self.nodes.get(&parent) {
                if matches!(info.state, NodeRunState::Done(_)) {
                    merge_into(&mut merged, &info.ancestor_artifacts);
                    merge_into(&mut merged, &info.artifacts);
                }
            }
        }
        merged
    }

    fn workflow_vars(&self) -> ExtraVars {
        let mut vars = self.launch.extra_vars.clone();
        vars.insert(
            "workflow_job_id".to_string(),
            Value::from(self.workflow_job.0),
        );
        vars.insert(
            "workflow_job_name".to_string(),
            Value::from(self.name.clone()),
        );
        vars
    }

    fn set_state(&mut self, id: NodeId, state: NodeRunState) {
        if let Some(info) = self.nodes.get_mut(&id) {
            info.state = state;
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeRunInfo> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| TowerflowError::NodeNotFound(id.to_string()))
    }

    fn gate_mut(&mut self, identifier: &str) -> Result<&mut ApprovalGate> {
        let id = self.graph.require(identifier)?;
        self.approvals.get_mut(&id).ok_or_else(|| {
            TowerflowError::Validation(format!(
                "node '{identifier}' is not an approval waiting for a decision"
            ))
        })
    }
}
