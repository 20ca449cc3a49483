//! Materializing evaluator.

use tracing::trace;

use crate::array::{ArrayError, HostArray, IndexKey};
use crate::error::{Result, UsageError};
use crate::graph::{BinaryOperator, GraphNode, Key, Node, NodeState, UnaryOperator, Value};

/// Evaluates an expression node to a concrete value.
///
/// Pure except for `AssignOp`, which writes into the buffer its base
/// evaluates to and returns that same buffer.
pub fn evaluate(node: &Node) -> Result<Value> {
    match node {
        Node::DataLeaf(array) => Ok(Value::Array(array.clone())),

        Node::ScalarLeaf(value) => Ok(Value::Scalar(*value)),

        Node::UnaryOp { operand, op } => {
            let operand = evaluate_ref(operand)?;
            apply_unary(*op, &operand)
        }

        Node::BinaryOp { lhs, rhs, op } => {
            let lhs = evaluate_ref(lhs)?;
            let rhs = evaluate_ref(rhs)?;
            apply_binary(*op, &lhs, &rhs)
        }

        Node::AssignOp { base, key, value } => {
            // Forcing pins the base to one cached buffer, so every handle on
            // the base node observes the write and a retry never reapplies
            // the assignments below it.
            let target = match base.force()? {
                Value::Array(array) => array,
                Value::Scalar(_) => {
                    return Err(UsageError::ScalarAssignBase { node: base.id() }.into())
                }
            };
            let key = match key {
                Key::Position(position) => IndexKey::Position(*position),
                Key::Node(key) => evaluate_ref(key)?.to_key()?,
            };
            // Materialize the value before taking the write lock: it may read
            // the very buffer being assigned.
            let value = evaluate_ref(value)?.to_host();
            target.write().set(&key, &value)?;
            Ok(Value::Array(target))
        }
    }
}

/// Evaluates a referenced graph node, reusing its cached result if it has one.
pub fn evaluate_ref(node: &GraphNode) -> Result<Value> {
    node.record_read();
    trace!(node = %node.id(), "value: visit");
    match node.state() {
        NodeState::Cached(value) => Ok(value),
        NodeState::Deferred(expr) => evaluate(&expr),
    }
}

fn apply_unary(op: UnaryOperator, operand: &Value) -> Result<Value> {
    let result = operand.with_host(|array| match op {
        UnaryOperator::Abs => Ok(array.abs()),
        UnaryOperator::Log => Ok(array.log()),
        UnaryOperator::Neg => array.neg(),
    })?;
    Ok(Value::from_host(result))
}

type BinaryKernel = fn(&HostArray, &HostArray) -> std::result::Result<HostArray, ArrayError>;

fn apply_binary(op: BinaryOperator, lhs: &Value, rhs: &Value) -> Result<Value> {
    let kernel: BinaryKernel = match op {
        BinaryOperator::Add => HostArray::add,
        BinaryOperator::Sub => HostArray::sub,
        BinaryOperator::Mul => HostArray::mul,
        BinaryOperator::Div => HostArray::div,
        BinaryOperator::Pow => HostArray::pow,
        BinaryOperator::Le => HostArray::le,
        BinaryOperator::GetItem => {
            let key = rhs.to_key()?;
            let result = lhs.with_host(|array| array.get(&key))?;
            return Ok(Value::from_host(result));
        }
    };
    let result = lhs.with_host(|a| rhs.with_host(|b| kernel(a, b)))?;
    Ok(Value::from_host(result))
}
