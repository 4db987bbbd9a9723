// src/graph/topo.rs

//! Whole-graph ordering checks backed by petgraph.

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{Result, TowerflowError};
use crate::graph::store::NodeGraph;
use crate::types::{EdgeType, NodeId};

/// Topological order of all live nodes, or the id of a node on a cycle.
pub fn topological_order(graph: &NodeGraph) -> std::result::Result<Vec<NodeId>, NodeId> {
    // Edge direction: parent -> child, for every edge type.
    let mut dag: DiGraphMap<NodeId, EdgeType> = DiGraphMap::new();

    for id in graph.node_ids() {
        dag.add_node(id);
    }
    for (parent, child, edge_type) in graph.edges() {
        dag.add_edge(parent, child, edge_type);
    }

    toposort(&dag, None).map_err(|cycle| cycle.node_id())
}

/// Fail with `CycleDetected` if the graph is not a DAG.
pub fn ensure_acyclic(graph: &NodeGraph) -> Result<()> {
    match topological_order(graph) {
        Ok(_order) => Ok(()),
        Err(node) => Err(TowerflowError::CycleDetected(format!(
            "cycle detected in workflow graph involving node '{}'",
            graph.label(node)
        ))),
    }
}
