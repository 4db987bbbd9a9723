// src/types.rs

//! Small shared identifier and enum types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Index of a node inside a workflow's node arena.
///
/// Ids are never reused within one graph, so a removed node leaves a hole
/// rather than shifting the ids of later nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identifier of a unified job (any launchable unit of work).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome-conditioned edge between two workflow nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Success,
    Failure,
    Always,
}

impl EdgeType {
    pub const ALL: [EdgeType; 3] = [EdgeType::Success, EdgeType::Failure, EdgeType::Always];

    /// Relationship name as exposed by the API (`success_nodes`, ...).
    pub fn relationship(self) -> &'static str {
        match self {
            EdgeType::Success => "success_nodes",
            EdgeType::Failure => "failure_nodes",
            EdgeType::Always => "always_nodes",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.relationship())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "success" | "success_nodes" => Ok(EdgeType::Success),
            "failure" | "failure_nodes" => Ok(EdgeType::Failure),
            "always" | "always_nodes" => Ok(EdgeType::Always),
            other => Err(format!(
                "invalid edge type: {other} (expected \"success\", \"failure\" or \"always\")"
            )),
        }
    }
}

/// How a unified job came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchType {
    Manual,
    Relaunch,
    Workflow,
    Scheduled,
}

impl Default for LaunchType {
    fn default() -> Self {
        LaunchType::Manual
    }
}
