// src/graph/node.rs

//! Per-node data stored in a workflow graph.

use crate::job::{LaunchOverrides, UnifiedJobTemplate};

/// A workflow node definition: what to launch and with which overrides.
///
/// Workflow job nodes are snapshots of these taken at launch time.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    /// Unique within one workflow.
    pub identifier: String,
    /// `None` models a node whose template was deleted.
    pub unified_job_template: Option<UnifiedJobTemplate>,
    pub overrides: LaunchOverrides,
    /// Launch only when every parent has finished and every incoming edge
    /// fired.
    pub all_parents_must_converge: bool,
}

impl NodeSpec {
    pub fn new(identifier: impl Into<String>, template: UnifiedJobTemplate) -> Self {
        Self {
            identifier: identifier.into(),
            unified_job_template: Some(template),
            overrides: LaunchOverrides::default(),
            all_parents_must_converge: false,
        }
    }

    /// A node with no template attached.
    pub fn without_template(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            unified_job_template: None,
            overrides: LaunchOverrides::default(),
            all_parents_must_converge: false,
        }
    }

    pub fn with_overrides(mut self, overrides: LaunchOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn converging(mut self, value: bool) -> Self {
        self.all_parents_must_converge = value;
        self
    }

    pub fn is_approval(&self) -> bool {
        self.unified_job_template
            .as_ref()
            .is_some_and(|t| t.is_approval())
    }
}
