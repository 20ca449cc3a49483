//! Diagnostic tree rendering.
//!
//! One line per graph node, children indented four spaces deeper than their
//! parent. Each line reports whether the node currently has an owning handle.

use tracing::trace;

use crate::graph::{GraphNode, Key, Node, NodeState, Value};

const INDENT: &str = "    ";

/// Renders the graph rooted at `root`.
pub fn render(root: &GraphNode) -> String {
    let mut out = String::new();
    render_node(root, 0, &mut out);
    out
}

fn line(out: &mut String, level: usize, text: &str) {
    out.push_str(&INDENT.repeat(level));
    out.push_str(text);
    out.push('\n');
}

fn render_node(node: &GraphNode, level: usize, out: &mut String) {
    trace!(node = %node.id(), level, "text: visit");
    let owned = format!("(owned={})", node.is_owned());
    match node.state() {
        NodeState::Cached(Value::Array(array)) => {
            let array = array.read();
            let text = format!("Cached {}{} {owned}: {}", array.dtype(), array.shape(), *array);
            line(out, level, &text);
        }
        NodeState::Cached(Value::Scalar(value)) => {
            line(out, level, &format!("Cached {} {owned}: {value}", value.dtype()));
        }
        NodeState::Deferred(expr) => match &expr {
            Node::DataLeaf(array) => {
                let array = array.read();
                let text = format!("DataLeaf {}{} {owned}: {}", array.dtype(), array.shape(), *array);
                line(out, level, &text);
            }
            Node::ScalarLeaf(value) => {
                line(out, level, &format!("ScalarLeaf {} {owned}: {value}", value.dtype()));
            }
            Node::UnaryOp { operand, .. } => {
                line(out, level, &format!("{} {owned}", expr.label()));
                render_node(operand, level + 1, out);
            }
            Node::BinaryOp { lhs, rhs, .. } => {
                line(out, level, &format!("{} {owned}", expr.label()));
                render_node(lhs, level + 1, out);
                render_node(rhs, level + 1, out);
            }
            Node::AssignOp { base, key, value } => {
                line(out, level, &format!("{} {owned}", expr.label()));
                render_node(base, level + 1, out);
                match key {
                    Key::Position(position) => line(out, level + 1, &format!("Key {position}")),
                    Key::Node(key) => render_node(key, level + 1, out),
                }
                render_node(value, level + 1, out);
            }
        },
    }
}
