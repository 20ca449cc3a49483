//! Deferred Array Handles
//!
//! [`LazyArray`] is the user-facing handle. Arithmetic on handles builds graph
//! nodes instead of computing; `force` (or anything that needs concrete data)
//! materializes the graph once and caches the result on the node.
//!
//! Handles track ownership on the node they point at: constructing or cloning
//! a handle counts as one owner, dropping it releases that claim, and
//! `index_set` moves the handle onto a new node.

use std::fmt;
use std::mem;
use std::sync::Arc;

use tracing::debug;

use crate::array::{ArrayRef, HostArray, Scalar};
use crate::error::Result;
use crate::eval::codegen::{self, GeneratedKernel};
use crate::eval::text;
use crate::graph::{BinaryOperator, GraphNode, GraphNodeRef, Key, Node, NodeId, UnaryOperator, Value};

/// Anything that can appear as an operand of a deferred operation.
pub trait IntoNode {
    fn into_node(self) -> GraphNodeRef;
}

impl IntoNode for &LazyArray {
    fn into_node(self) -> GraphNodeRef {
        Arc::clone(&self.node)
    }
}

impl IntoNode for LazyArray {
    fn into_node(self) -> GraphNodeRef {
        Arc::clone(&self.node)
    }
}

impl IntoNode for Scalar {
    fn into_node(self) -> GraphNodeRef {
        GraphNode::new(Node::ScalarLeaf(self))
    }
}

macro_rules! scalar_into_node {
    ($($ty:ty),*) => {$(
        impl IntoNode for $ty {
            fn into_node(self) -> GraphNodeRef {
                Scalar::from(self).into_node()
            }
        }
    )*};
}

scalar_into_node!(bool, i64, i32, f64);

impl From<&LazyArray> for Key {
    fn from(array: &LazyArray) -> Self {
        Key::Node(Arc::clone(&array.node))
    }
}

impl From<LazyArray> for Key {
    fn from(array: LazyArray) -> Self {
        Key::from(&array)
    }
}

/// Handle to a node of a deferred expression graph.
pub struct LazyArray {
    node: GraphNodeRef,
}

impl LazyArray {
    /// Wraps an existing graph node, claiming ownership of it.
    pub fn from_node(node: GraphNodeRef) -> Self {
        node.acquire();
        Self { node }
    }

    pub fn from_data(array: HostArray) -> Self {
        Self::from_shared(ArrayRef::new(array))
    }

    /// A leaf over an existing buffer. Writes through any handle sharing the
    /// buffer are visible here.
    pub fn from_shared(array: ArrayRef) -> Self {
        Self::from_node(GraphNode::new(Node::DataLeaf(array)))
    }

    pub fn scalar(value: impl Into<Scalar>) -> Self {
        let value: Scalar = value.into();
        Self::from_node(value.into_node())
    }

    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    pub fn node(&self) -> &GraphNodeRef {
        &self.node
    }

    pub fn owner_count(&self) -> usize {
        self.node.owner_count()
    }

    pub fn is_owned(&self) -> bool {
        self.node.is_owned()
    }

    pub fn is_cached(&self) -> bool {
        self.node.is_cached()
    }

    pub fn read_count(&self) -> usize {
        self.node.read_count()
    }

    fn unary(&self, op: UnaryOperator) -> LazyArray {
        Self::from_node(GraphNode::new(Node::UnaryOp {
            operand: Arc::clone(&self.node),
            op,
        }))
    }

    fn binary(&self, rhs: impl IntoNode, op: BinaryOperator) -> LazyArray {
        Self::from_node(GraphNode::new(Node::BinaryOp {
            lhs: Arc::clone(&self.node),
            rhs: rhs.into_node(),
            op,
        }))
    }

    pub fn add(&self, rhs: impl IntoNode) -> LazyArray {
        self.binary(rhs, BinaryOperator::Add)
    }

    pub fn sub(&self, rhs: impl IntoNode) -> LazyArray {
        self.binary(rhs, BinaryOperator::Sub)
    }

    pub fn mul(&self, rhs: impl IntoNode) -> LazyArray {
        self.binary(rhs, BinaryOperator::Mul)
    }

    pub fn div(&self, rhs: impl IntoNode) -> LazyArray {
        self.binary(rhs, BinaryOperator::Div)
    }

    pub fn pow(&self, rhs: impl IntoNode) -> LazyArray {
        self.binary(rhs, BinaryOperator::Pow)
    }

    /// Elementwise `self <= rhs`.
    pub fn le(&self, rhs: impl IntoNode) -> LazyArray {
        self.binary(rhs, BinaryOperator::Le)
    }

    /// Deferred `self[key]`. The key may be a position, a mask or an index array.
    pub fn get(&self, key: impl IntoNode) -> LazyArray {
        self.binary(key, BinaryOperator::GetItem)
    }

    pub fn abs(&self) -> LazyArray {
        self.unary(UnaryOperator::Abs)
    }

    pub fn log(&self) -> LazyArray {
        self.unary(UnaryOperator::Log)
    }

    pub fn neg(&self) -> LazyArray {
        self.unary(UnaryOperator::Neg)
    }

    /// Deferred `self[key] = value`.
    ///
    /// The handle moves onto a new assignment node whose base is its previous
    /// node. Nothing is written until the new node is forced; the write then
    /// lands in the buffer the base evaluates to.
    pub fn index_set(&mut self, key: impl Into<Key>, value: impl IntoNode) {
        let assign = GraphNode::new(Node::AssignOp {
            base: Arc::clone(&self.node),
            key: key.into(),
            value: value.into_node(),
        });
        assign.acquire();
        let prior = mem::replace(&mut self.node, assign);
        prior.release();
        debug!(from = %prior.id(), to = %self.node.id(), "index_set: handle moved");
    }

    /// Materializes the graph behind this handle.
    pub fn force(&self) -> Result<Value> {
        self.node.force()
    }

    /// Forces and copies the result out. Scalar results become rank-0 arrays.
    pub fn to_host(&self) -> Result<HostArray> {
        Ok(self.force()?.to_host())
    }

    /// Forces and reduces the result to the sum of its elements.
    pub fn sum(&self) -> Result<Scalar> {
        Ok(self.force()?.with_host(HostArray::sum))
    }

    /// Indented tree rendering of the graph, one node per line.
    pub fn to_text(&self) -> String {
        text::render(&self.node)
    }

    /// Renders the graph as fused kernel source plus its argument buffers.
    pub fn generate_kernel(&self) -> Result<GeneratedKernel> {
        codegen::generate(&self.node)
    }
}

impl Clone for LazyArray {
    fn clone(&self) -> Self {
        Self::from_node(Arc::clone(&self.node))
    }
}

impl Drop for LazyArray {
    fn drop(&mut self) {
        self.node.release();
    }
}

impl fmt::Debug for LazyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

macro_rules! impl_binary_ops {
    ($($trait:ident, $method:ident);* $(;)?) => {$(
        impl<R: IntoNode> std::ops::$trait<R> for &LazyArray {
            type Output = LazyArray;

            fn $method(self, rhs: R) -> LazyArray {
                LazyArray::$method(self, rhs)
            }
        }

        impl<R: IntoNode> std::ops::$trait<R> for LazyArray {
            type Output = LazyArray;

            fn $method(self, rhs: R) -> LazyArray {
                LazyArray::$method(&self, rhs)
            }
        }
    )*};
}

impl_binary_ops! {
    Add, add;
    Sub, sub;
    Mul, mul;
    Div, div;
}

impl std::ops::Neg for &LazyArray {
    type Output = LazyArray;

    fn neg(self) -> LazyArray {
        LazyArray::neg(self)
    }
}

impl std::ops::Neg for LazyArray {
    type Output = LazyArray;

    fn neg(self) -> LazyArray {
        LazyArray::neg(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DType;
    use crate::error::{Error, UsageError};
    use crate::graph::NodeState;

    fn ints(values: Vec<i64>) -> LazyArray {
        LazyArray::from_data(HostArray::from_vec(values))
    }

    #[test]
    fn operators_build_nodes_without_computing() {
        let x = ints(vec![1, 2, 3]);
        let y = ints(vec![10, 20, 30]);
        let z = &x + &y * 2;

        assert!(!z.is_cached());
        assert_eq!(x.read_count(), 0);
        assert!(matches!(
            z.node().state(),
            NodeState::Deferred(Node::BinaryOp { op: BinaryOperator::Add, .. })
        ));
        assert_eq!(z.to_host().unwrap().to_i64_vec(), vec![21, 42, 63]);
    }

    #[test]
    fn ownership_follows_handles() {
        let x = ints(vec![1]);
        assert_eq!(x.owner_count(), 1);

        let y = x.clone();
        assert_eq!(x.owner_count(), 2);
        drop(y);
        assert_eq!(x.owner_count(), 1);

        // An operand referenced only by its parent is not owned.
        let sum = &x + 1;
        let NodeState::Deferred(Node::BinaryOp { rhs, .. }) = sum.node().state() else {
            panic!("expected a binary node");
        };
        assert!(!rhs.is_owned());
    }

    #[test]
    fn index_set_moves_ownership() {
        let mut x = ints(vec![1, 2, 3]);
        let before = Arc::clone(x.node());
        x.index_set(0, 7);

        assert!(!before.is_owned());
        assert_eq!(x.owner_count(), 1);
        assert_ne!(x.id(), before.id());
        assert_eq!(x.to_host().unwrap().to_i64_vec(), vec![7, 2, 3]);
    }

    #[test]
    fn assignment_is_visible_through_aliases() {
        let a = ints(vec![1, 2, 3]);
        let mut b = a.clone();
        b.index_set(-1, 0);

        // Deferred: nothing written yet.
        assert_eq!(a.to_host().unwrap().to_i64_vec(), vec![1, 2, 3]);

        b.force().unwrap();
        assert_eq!(a.to_host().unwrap().to_i64_vec(), vec![1, 2, 0]);
    }

    #[test]
    fn assignment_through_cached_base() {
        let x = ints(vec![1, 2]);
        let doubled = &x * 2;
        doubled.force().unwrap();

        let mut target = doubled.clone();
        target.index_set(1, 100);
        target.force().unwrap();

        assert_eq!(doubled.to_host().unwrap().to_i64_vec(), vec![2, 100]);
        assert_eq!(x.to_host().unwrap().to_i64_vec(), vec![1, 2]);
    }

    #[test]
    fn mask_keys_and_lazy_values() {
        let z = LazyArray::from_data(HostArray::from_vec(vec![-3.0, 0.5, 4.0]));
        let mut out = ints(vec![0, 0, 0]);
        let inside = z.abs().le(2.0);
        out.index_set(&inside, 1);
        assert_eq!(out.to_host().unwrap().to_i64_vec(), vec![0, 1, 0]);
    }

    #[test]
    fn scalar_base_cannot_be_assigned() {
        let mut s = LazyArray::scalar(3);
        s.index_set(0, 1);
        assert!(matches!(
            s.force(),
            Err(Error::Usage(UsageError::ScalarAssignBase { .. }))
        ));
        assert!(!s.is_cached());
    }

    #[test]
    fn get_and_sum() {
        let x = ints(vec![4, 5, 6]);
        assert_eq!(x.get(1).force().unwrap().as_scalar(), Some(Scalar::Int(5)));
        assert_eq!(x.get(ints(vec![2, 0])).to_host().unwrap().to_i64_vec(), vec![6, 4]);
        assert_eq!((&x * 2).sum().unwrap(), Scalar::Int(30));
    }

    #[test]
    fn unary_operators() {
        let x = LazyArray::from_data(HostArray::from_vec(vec![-1.0, 2.0]));
        assert_eq!((-&x).to_host().unwrap().to_f64_vec(), vec![1.0, -2.0]);
        assert_eq!(x.abs().to_host().unwrap().to_f64_vec(), vec![1.0, 2.0]);
        assert_eq!(x.pow(2).div(2).to_host().unwrap().dtype(), DType::Float64);
    }

    #[test]
    fn array_errors_pass_through() {
        let x = ints(vec![1, 2]);
        let y = ints(vec![1, 2, 3]);
        assert!(matches!((&x + &y).force(), Err(Error::Array(_))));
    }

    #[test]
    fn debug_prints_the_tree() {
        let x = ints(vec![1]);
        let expr = x.abs();
        assert_eq!(format!("{expr:?}"), expr.to_text());
    }

    #[test]
    fn assignment_through_operator_base_is_shared() {
        let x = ints(vec![1, 2, 3]);
        let mut a = &x * 2;
        let c = a.clone();
        a.index_set(0, 99);

        assert_eq!(a.to_host().unwrap().to_i64_vec(), vec![99, 4, 6]);
        assert_eq!(c.to_host().unwrap().to_i64_vec(), vec![99, 4, 6]);
        assert!(c.is_cached());
        assert_eq!(x.to_host().unwrap().to_i64_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn failed_chained_assignment_is_not_reapplied() {
        let base = ints(vec![1, 2, 3]);
        let mut a = base.clone();
        a.index_set(0, (&base + 1).get(0));
        let first = Arc::clone(a.node());
        a.index_set(9, 0);

        assert!(matches!(a.force(), Err(Error::Array(_))));
        assert!(!a.is_cached());
        // The inner assignment completed and is cached on its own node.
        assert!(first.is_cached());
        assert_eq!(base.to_host().unwrap().to_i64_vec(), vec![2, 2, 3]);

        assert!(a.force().is_err());
        assert_eq!(base.to_host().unwrap().to_i64_vec(), vec![2, 2, 3]);
    }

    #[test]
    fn nodes_are_freed_with_their_last_reference() {
        let x = ints(vec![1, 2]);
        let leaf = Arc::downgrade(x.node());
        let y = &x + 1;
        let constant = {
            let NodeState::Deferred(Node::BinaryOp { rhs, .. }) = y.node().state() else {
                panic!("expected a binary node");
            };
            Arc::downgrade(&rhs)
        };
        let sum = Arc::downgrade(y.node());

        drop(x);
        assert!(leaf.upgrade().is_some());
        assert!(constant.upgrade().is_some());

        drop(y);
        assert!(sum.upgrade().is_none());
        assert!(leaf.upgrade().is_none());
        assert!(constant.upgrade().is_none());
    }

    #[test]
    fn forcing_releases_operands() {
        let x = ints(vec![1, 2]);
        let leaf = Arc::downgrade(x.node());
        let y = x.abs();
        drop(x);

        y.force().unwrap();
        assert!(leaf.upgrade().is_none());
        assert_eq!(y.to_host().unwrap().to_i64_vec(), vec![1, 2]);
    }
}
