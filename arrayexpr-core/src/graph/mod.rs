//! Expression Graph
//!
//! This module implements the deferred expression graph that array handles
//! build instead of computing eagerly.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - Leaves are concrete arrays or scalar constants
//! - Operator nodes reference the graph nodes of their operands
//!
//! Every expression node lives inside a [`GraphNode`], which adds an identity,
//! a count of owning handles, and a state cell that is overwritten with the
//! materialized result the first time the node is forced.
//!
//! # Design Decisions
//!
//! 1. Nodes are a closed enum with no behavior. Evaluators match on it
//!    exhaustively, so adding a variant is a compile error until every
//!    evaluator handles it.
//!
//! 2. Identity is an explicit [`NodeId`] assigned at creation, not an address.
//!
//! 3. Subexpressions are shared by `Arc`. Operator nodes can only point at
//!    nodes that already exist, so cycles cannot be built.

mod expr;
mod node;
mod value;

pub use expr::{BinaryOperator, Key, Node, UnaryOperator};
pub use node::{GraphNode, GraphNodeRef, NodeId, NodeState};
pub use value::Value;
