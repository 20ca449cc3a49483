//! Graph Evaluators
//!
//! Three recursive interpreters over the same DAG. Each one is an exhaustive
//! match on [`Node`](crate::graph::Node); a node that has already been forced
//! is treated as the leaf its cached value describes.
//!
//! - [`value`]: materializes a graph into a concrete array or scalar
//! - [`text`]: renders an indented diagnostic tree
//! - [`codegen`]: renders fused kernel text plus its ordered free variables
//!
//! None of them cache. Caching happens on the graph node, in
//! [`GraphNode::force`](crate::graph::GraphNode::force), which the value
//! evaluator also calls on the base of every index assignment.
//!
//! Recursion depth equals graph depth. Long update loops should force the
//! handle periodically, which collapses the forced node into a leaf.

pub mod codegen;
pub mod text;
pub mod value;
