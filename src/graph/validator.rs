// src/graph/validator.rs

//! Relation validator: decides whether a candidate edge may be added.
//!
//! The result is a user-facing validation failure, not a crate error, so it
//! serializes as `{"Error": "<message>"}` for the API layer.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::graph::store::{NodeGraph, ParentPolicy};
use crate::types::{EdgeType, NodeId};

/// Why a candidate edge was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationError {
    /// `always` edges cannot coexist with `success`/`failure` edges from the
    /// same parent.
    MutuallyExclusive {
        relationship: EdgeType,
        existing: EdgeType,
    },
    /// The parent already links to the child through another edge type.
    RelationshipNotAllowed,
    MultipleParents,
    CycleDetected,
}

impl fmt::Display for RelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationError::MutuallyExclusive {
                relationship,
                existing,
            } => write!(
                f,
                "Cannot associate {relationship} when {existing} have been associated."
            ),
            RelationError::RelationshipNotAllowed => f.write_str("Relationship not allowed."),
            RelationError::MultipleParents => {
                f.write_str("Multiple parent relationship not allowed.")
            }
            RelationError::CycleDetected => f.write_str("Cycle detected."),
        }
    }
}

impl std::error::Error for RelationError {}

impl Serialize for RelationError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("Error", &self.to_string())?;
        map.end()
    }
}

/// Edge-type exclusion check on its own.
pub fn check_mutual_exclusion(
    graph: &NodeGraph,
    parent: NodeId,
    edge_type: EdgeType,
) -> Option<RelationError> {
    let conflicting: &[EdgeType] = match edge_type {
        EdgeType::Always => &[EdgeType::Success, EdgeType::Failure],
        EdgeType::Success | EdgeType::Failure => &[EdgeType::Always],
    };

    conflicting
        .iter()
        .find(|existing| graph.has_children(parent, **existing))
        .map(|existing| RelationError::MutuallyExclusive {
            relationship: edge_type,
            existing: *existing,
        })
}

/// Validate `parent -[edge_type]-> sub` against the current graph.
///
/// `created` is set when `sub` was created as part of this association, in
/// which case only the exclusion rule applies.
///
/// Returns `None` when the edge is admissible.
pub fn is_valid_relation(
    graph: &NodeGraph,
    parent: NodeId,
    sub: NodeId,
    edge_type: EdgeType,
    created: bool,
) -> Option<RelationError> {
    if let Some(err) = check_mutual_exclusion(graph, parent, edge_type) {
        return Some(err);
    }

    if created {
        return None;
    }

    if parent == sub {
        return Some(RelationError::CycleDetected);
    }

    let other_link = EdgeType::ALL
        .into_iter()
        .filter(|t| *t != edge_type)
        .any(|t| graph.has_edge(parent, sub, t));
    if other_link {
        return Some(RelationError::RelationshipNotAllowed);
    }

    if graph.has_edge(parent, sub, edge_type) {
        return None;
    }

    match graph.policy().parents {
        ParentPolicy::Single => walk_parent_chain(graph, parent, sub),
        ParentPolicy::Multiple => {
            if graph.reaches(sub, parent) {
                Some(RelationError::CycleDetected)
            } else {
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct NodeMeta {
    parent: Option<NodeId>,
    traversed: bool,
}

/// Back-pointer check used when every node has at most one parent.
///
/// Builds a fresh parent pointer per node from the existing edges, hooks
/// `sub` under `parent` and walks up from `sub`; meeting a node twice means
/// the new edge closes a cycle.
fn walk_parent_chain(graph: &NodeGraph, parent: NodeId, sub: NodeId) -> Option<RelationError> {
    let mut meta = vec![NodeMeta::default(); graph.capacity()];

    for edge_type in EdgeType::ALL {
        for node in graph.node_ids() {
            for child in graph.children(node, edge_type) {
                let entry = &mut meta[child.0];
                if entry.parent.is_none() {
                    entry.parent = Some(node);
                }
            }
        }
    }

    if meta[sub.0].parent.is_some() {
        return Some(RelationError::MultipleParents);
    }
    meta[sub.0].parent = Some(parent);

    let mut cursor = Some(sub);
    while let Some(id) = cursor {
        let entry = &mut meta[id.0];
        if entry.traversed {
            return Some(RelationError::CycleDetected);
        }
        entry.traversed = true;
        cursor = entry.parent;
    }

    None
}
