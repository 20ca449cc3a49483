//! Expression Variants
//!
//! The closed set of node variants an expression graph is built from. Nodes
//! are plain data: every interpretation (materializing, printing, code
//! generation) lives in [`crate::eval`] as an exhaustive match over [`Node`].

use std::fmt;

use crate::array::{ArrayRef, Scalar};

use super::GraphNodeRef;

/// Elementwise functions of one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Abs,
    Log,
    Neg,
}

impl UnaryOperator {
    pub const ALL: [UnaryOperator; 3] = [UnaryOperator::Abs, UnaryOperator::Log, UnaryOperator::Neg];

    /// Name used in diagnostics and generated kernel text.
    pub fn name(self) -> &'static str {
        match self {
            UnaryOperator::Abs => "abs",
            UnaryOperator::Log => "log",
            UnaryOperator::Neg => "neg",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

/// Functions of two operands. All are elementwise except `GetItem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Le,
    /// Index read: `lhs[rhs]`.
    GetItem,
}

impl BinaryOperator {
    pub const ALL: [BinaryOperator; 7] = [
        BinaryOperator::Add,
        BinaryOperator::Sub,
        BinaryOperator::Mul,
        BinaryOperator::Div,
        BinaryOperator::Pow,
        BinaryOperator::Le,
        BinaryOperator::GetItem,
    ];

    /// Name used in diagnostics and generated kernel text.
    pub fn name(self) -> &'static str {
        match self {
            BinaryOperator::Add => "add",
            BinaryOperator::Sub => "sub",
            BinaryOperator::Mul => "mul",
            BinaryOperator::Div => "div",
            BinaryOperator::Pow => "pow",
            BinaryOperator::Le => "le",
            BinaryOperator::GetItem => "getitem",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The selector of an index assignment.
#[derive(Debug, Clone)]
pub enum Key {
    /// A fixed flat position.
    Position(i64),
    /// A deferred key (mask or position list) evaluated at forcing time.
    Node(GraphNodeRef),
}

impl From<i64> for Key {
    fn from(position: i64) -> Self {
        Key::Position(position)
    }
}

impl From<i32> for Key {
    fn from(position: i32) -> Self {
        Key::Position(i64::from(position))
    }
}

/// One node of an expression graph.
///
/// Operator variants reference [`GraphNode`](super::GraphNode)s that existed
/// before the operator was built, which keeps every graph acyclic.
#[derive(Debug, Clone)]
pub enum Node {
    /// A concrete array.
    DataLeaf(ArrayRef),

    /// A constant scalar.
    ScalarLeaf(Scalar),

    UnaryOp {
        operand: GraphNodeRef,
        op: UnaryOperator,
    },

    BinaryOp {
        lhs: GraphNodeRef,
        rhs: GraphNodeRef,
        op: BinaryOperator,
    },

    /// `base` with `[key]` set to `value`.
    ///
    /// Forcing writes into the buffer `base` evaluates to, so every handle
    /// sharing that buffer observes the assignment.
    AssignOp {
        base: GraphNodeRef,
        key: Key,
        value: GraphNodeRef,
    },
}

impl Node {
    /// Short label naming the variant (and its operator, if any).
    pub fn label(&self) -> String {
        match self {
            Node::DataLeaf(_) => "DataLeaf".to_string(),
            Node::ScalarLeaf(_) => "ScalarLeaf".to_string(),
            Node::UnaryOp { op, .. } => format!("UnaryOp {op}"),
            Node::BinaryOp { op, .. } => format!("BinaryOp {op}"),
            Node::AssignOp { .. } => "AssignOp".to_string(),
        }
    }
}
