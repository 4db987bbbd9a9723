// src/graph/store.rs

//! Node graph store: an index-based arena of nodes plus three outgoing
//! edge sets (success / failure / always) per node.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::errors::{Result, TowerflowError};
use crate::graph::node::NodeSpec;
use crate::graph::validator::{check_mutual_exclusion, is_valid_relation, RelationError};
use crate::types::{EdgeType, NodeId};

/// Whether a node may be attached under more than one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParentPolicy {
    #[default]
    Single,
    Multiple,
}

/// Limits applied to every mutation of a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphPolicy {
    pub max_nodes: Option<usize>,
    pub parents: ParentPolicy,
}

#[derive(Debug, Clone, Default)]
struct EdgeSets {
    success: BTreeSet<NodeId>,
    failure: BTreeSet<NodeId>,
    always: BTreeSet<NodeId>,
}

impl EdgeSets {
    fn get(&self, edge_type: EdgeType) -> &BTreeSet<NodeId> {
        match edge_type {
            EdgeType::Success => &self.success,
            EdgeType::Failure => &self.failure,
            EdgeType::Always => &self.always,
        }
    }

    fn get_mut(&mut self, edge_type: EdgeType) -> &mut BTreeSet<NodeId> {
        match edge_type {
            EdgeType::Success => &mut self.success,
            EdgeType::Failure => &mut self.failure,
            EdgeType::Always => &mut self.always,
        }
    }

    fn remove_everywhere(&mut self, node: NodeId) {
        self.success.remove(&node);
        self.failure.remove(&node);
        self.always.remove(&node);
    }
}

/// Workflow node graph.
#[derive(Debug, Clone, Default)]
pub struct NodeGraph {
    policy: GraphPolicy,
    /// Arena slot per node id; `None` once removed.
    slots: Vec<Option<NodeSpec>>,
    /// Outgoing edges, aligned with `slots`.
    children: Vec<EdgeSets>,
    by_identifier: HashMap<String, NodeId>,
}

impl NodeGraph {
    pub fn new(policy: GraphPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> GraphPolicy {
        self.policy
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }

    /// Upper bound (exclusive) on node ids handed out so far.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeSpec> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn lookup(&self, identifier: &str) -> Option<NodeId> {
        self.by_identifier.get(identifier).copied()
    }

    /// Identifier for log and error messages; falls back to the raw id.
    pub fn label(&self, id: NodeId) -> String {
        self.node(id)
            .map(|n| n.identifier.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Live node ids in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(idx, _)| NodeId(idx))
    }

    pub fn children(&self, id: NodeId, edge_type: EdgeType) -> impl Iterator<Item = NodeId> + '_ {
        self.children
            .get(id.0)
            .into_iter()
            .flat_map(move |sets| sets.get(edge_type).iter().copied())
    }

    pub fn has_children(&self, id: NodeId, edge_type: EdgeType) -> bool {
        self.children(id, edge_type).next().is_some()
    }

    pub fn has_edge(&self, parent: NodeId, child: NodeId, edge_type: EdgeType) -> bool {
        self.children
            .get(parent.0)
            .is_some_and(|sets| sets.get(edge_type).contains(&child))
    }

    /// Incoming edges of `id` as `(parent, edge_type)` pairs.
    pub fn parents_of(&self, id: NodeId) -> Vec<(NodeId, EdgeType)> {
        let mut parents = Vec::new();
        for parent in self.node_ids() {
            for edge_type in EdgeType::ALL {
                if self.has_edge(parent, id, edge_type) {
                    parents.push((parent, edge_type));
                }
            }
        }
        parents
    }

    /// Nodes without any incoming edge.
    pub fn roots(&self) -> Vec<NodeId> {
        let mut has_parent = vec![false; self.slots.len()];
        for (_, child, _) in self.edges() {
            has_parent[child.0] = true;
        }
        self.node_ids().filter(|id| !has_parent[id.0]).collect()
    }

    /// Every edge as `(parent, child, edge_type)`.
    pub fn edges(&self) -> Vec<(NodeId, NodeId, EdgeType)> {
        let mut edges = Vec::new();
        for parent in self.node_ids() {
            for edge_type in EdgeType::ALL {
                for child in self.children(parent, edge_type) {
                    edges.push((parent, child, edge_type));
                }
            }
        }
        edges
    }

    /// Whether `to` can be reached from `from` following edges of any type.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut visited = vec![false; self.slots.len()];

        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if visited[id.0] {
                continue;
            }
            visited[id.0] = true;
            for edge_type in EdgeType::ALL {
                stack.extend(self.children(id, edge_type));
            }
        }
        false
    }

    /// Add a node. The store is unchanged on failure.
    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId> {
        if spec.identifier.trim().is_empty() {
            return Err(TowerflowError::Validation(
                "node identifier must not be empty".to_string(),
            ));
        }
        if self.by_identifier.contains_key(&spec.identifier) {
            return Err(TowerflowError::DuplicateIdentifier(spec.identifier));
        }
        if let Some(max) = self.policy.max_nodes {
            if self.len() >= max {
                return Err(TowerflowError::Validation(format!(
                    "workflow already has the maximum of {max} nodes"
                )));
            }
        }

        let id = NodeId(self.slots.len());
        debug!(node = %spec.identifier, %id, "adding workflow node");
        self.by_identifier.insert(spec.identifier.clone(), id);
        self.slots.push(Some(spec));
        self.children.push(EdgeSets::default());
        Ok(id)
    }

    /// Validate and add an edge between two existing nodes.
    ///
    /// Re-adding an edge that already exists with the same type succeeds
    /// without changing anything.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId, edge_type: EdgeType) -> Result<()> {
        self.ensure_node(parent)?;
        self.ensure_node(child)?;

        if let Some(err) = is_valid_relation(self, parent, child, edge_type, false) {
            debug!(
                parent = %self.label(parent),
                child = %self.label(child),
                %edge_type,
                error = %err,
                "rejected workflow edge"
            );
            return Err(self.relation_error(err, parent, child));
        }

        self.children[parent.0].get_mut(edge_type).insert(child);
        debug!(
            parent = %self.label(parent),
            child = %self.label(child),
            %edge_type,
            "added workflow edge"
        );
        Ok(())
    }

    /// `add_edge` addressed by identifiers.
    pub fn add_edge_between(&mut self, parent: &str, child: &str, edge_type: EdgeType) -> Result<()> {
        let parent = self.require(parent)?;
        let child = self.require(child)?;
        self.add_edge(parent, child, edge_type)
    }

    /// Create a node and attach it under `parent` in one step.
    ///
    /// Only the edge-type exclusion rule applies; a brand new node can
    /// neither close a cycle nor already have a parent.
    pub fn add_child_node(
        &mut self,
        parent: NodeId,
        spec: NodeSpec,
        edge_type: EdgeType,
    ) -> Result<NodeId> {
        self.ensure_node(parent)?;
        if let Some(err) = check_mutual_exclusion(self, parent, edge_type) {
            return Err(TowerflowError::InvalidEdgeType(err.to_string()));
        }

        let child = self.add_node(spec)?;
        debug_assert!(is_valid_relation(self, parent, child, edge_type, true).is_none());
        self.children[parent.0].get_mut(edge_type).insert(child);
        Ok(child)
    }

    /// Remove one edge. Returns whether it existed.
    pub fn remove_edge(&mut self, parent: NodeId, child: NodeId, edge_type: EdgeType) -> bool {
        match self.children.get_mut(parent.0) {
            Some(sets) => sets.get_mut(edge_type).remove(&child),
            None => false,
        }
    }

    /// Remove a node and every edge that references it.
    pub fn remove_node(&mut self, identifier: &str) -> Result<NodeSpec> {
        let id = self.require(identifier)?;

        for sets in self.children.iter_mut() {
            sets.remove_everywhere(id);
        }
        self.children[id.0] = EdgeSets::default();
        self.by_identifier.remove(identifier);

        let spec = self.slots[id.0]
            .take()
            .ok_or_else(|| TowerflowError::NodeNotFound(identifier.to_string()))?;
        debug!(node = %identifier, %id, "removed workflow node and its edges");
        Ok(spec)
    }

    pub fn require(&self, identifier: &str) -> Result<NodeId> {
        self.lookup(identifier)
            .ok_or_else(|| TowerflowError::NodeNotFound(identifier.to_string()))
    }

    fn ensure_node(&self, id: NodeId) -> Result<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(TowerflowError::NodeNotFound(id.to_string()))
        }
    }

    fn relation_error(&self, err: RelationError, parent: NodeId, child: NodeId) -> TowerflowError {
        match err {
            RelationError::MutuallyExclusive { .. } | RelationError::RelationshipNotAllowed => {
                TowerflowError::InvalidEdgeType(err.to_string())
            }
            RelationError::MultipleParents => TowerflowError::Validation(err.to_string()),
            RelationError::CycleDetected => TowerflowError::CycleDetected(format!(
                "adding '{}' -> '{}' would create a cycle",
                self.label(parent),
                self.label(child)
            )),
        }
    }
}
