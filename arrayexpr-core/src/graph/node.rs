//! Graph Nodes
//!
//! This module defines the shared cell every expression node lives in.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{Node, Value};
use crate::error::Result;
use crate::eval;

/// Unique identifier for a node in an expression graph.
///
/// Ids increase monotonically in creation order. Code generation names free
/// variables after them, so they must never be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Materialization state of a graph node.
#[derive(Debug, Clone)]
pub enum NodeState {
    /// Not forced yet; holds the expression to evaluate.
    Deferred(Node),

    /// Forced. The expression (and its hold on child nodes) is gone and the
    /// node behaves like a leaf from now on.
    Cached(Value),
}

/// Shared reference to a graph node.
pub type GraphNodeRef = Arc<GraphNode>;

/// A node in an expression graph.
///
/// Shared by every handle and every parent operator that references the same
/// subexpression; dropped once the last strong reference goes away.
pub struct GraphNode {
    /// Unique identifier for this node.
    id: NodeId,

    /// Expression or cached result. Held locked for the whole of `force`, so
    /// the `Deferred -> Cached` transition runs at most once.
    state: Mutex<NodeState>,

    /// Number of live handles pointing at this node. Bookkeeping only; the
    /// `Arc` is what keeps the node alive.
    owners: AtomicUsize,

    /// Number of times the value evaluator has read this node.
    reads: AtomicUsize,
}

impl GraphNode {
    /// Create a new, unforced node wrapping `node`.
    pub fn new(node: Node) -> GraphNodeRef {
        Arc::new(Self {
            id: NodeId::new(),
            state: Mutex::new(NodeState::Deferred(node)),
            owners: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        })
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> NodeState {
        self.state.lock().clone()
    }

    pub fn is_cached(&self) -> bool {
        matches!(*self.state.lock(), NodeState::Cached(_))
    }

    pub fn owner_count(&self) -> usize {
        self.owners.load(Ordering::SeqCst)
    }

    /// Whether any handle currently references this node.
    pub fn is_owned(&self) -> bool {
        self.owner_count() > 0
    }

    pub(crate) fn acquire(&self) {
        self.owners.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.owners.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    /// Materialize this node, caching the result.
    ///
    /// A cached node returns its result without re-evaluating. A failed
    /// evaluation leaves the node deferred, so a later call retries in full.
    pub fn force(&self) -> Result<Value> {
        let mut state = self.state.lock();
        let value = match &*state {
            NodeState::Cached(value) => {
                debug!(node = %self.id, "force: cache hit");
                return Ok(value.clone());
            }
            NodeState::Deferred(node) => {
                debug!(node = %self.id, kind = %node.label(), "force: evaluating");
                self.record_read();
                eval::value::evaluate(node)?
            }
        };
        *state = NodeState::Cached(value.clone());
        Ok(value)
    }
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("owners", &self.owner_count())
            .field("cached", &self.is_cached())
            .finish()
    }
}
