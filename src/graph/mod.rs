// src/graph/mod.rs

//! Workflow node graph and its validation.
//!
//! - [`node`] holds the per-node definition.
//! - [`store`] is the arena-backed graph with success/failure/always edges.
//! - [`validator`] decides whether a candidate edge is admissible.
//! - [`topo`] runs whole-graph topological checks.

pub mod node;
pub mod store;
pub mod topo;
pub mod validator;

pub use node::NodeSpec;
pub use store::{GraphPolicy, NodeGraph, ParentPolicy};
pub use topo::{ensure_acyclic, topological_order};
pub use validator::{is_valid_relation, RelationError};
