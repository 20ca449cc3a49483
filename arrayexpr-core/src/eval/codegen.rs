//! Fused Kernel Code Generation
//!
//! Renders an expression graph as a single prefix-call expression, e.g.
//! `add(x3, mul(x4, 2))`, together with the ordered list of free variables
//! that expression reads.
//!
//! # Free Variables
//!
//! Every distinct array leaf becomes one parameter. Leaves are keyed by graph
//! node identity: a leaf reached twice (as in `a + a`) is bound once and
//! referenced twice, while two leaves holding equal data stay two parameters.
//! Names are `x{id}`, so generating twice for the same graph yields identical
//! text and parameter order.
//!
//! A node that has been forced counts as a leaf of its cached value.
//!
//! # Limits
//!
//! Index assignments have no elementwise form; generating code for a graph
//! containing one is a [`UsageError::AssignInKernel`].

use indexmap::IndexMap;
use tracing::trace;

use crate::array::{ArrayRef, DType};
use crate::error::{Result, UsageError};
use crate::graph::{GraphNode, Node, NodeId, NodeState, Value};
use crate::jit::{KernelParam, KernelSource};

/// One kernel parameter and the buffer bound to it.
#[derive(Debug, Clone)]
pub struct FreeVariable {
    pub name: String,
    pub dtype: DType,
    pub array: ArrayRef,
}

/// Output of code generation: kernel text plus the argument buffers, in
/// parameter order.
#[derive(Debug, Clone)]
pub struct GeneratedKernel {
    pub source: KernelSource,
    pub arguments: Vec<ArrayRef>,
}

/// Free variables discovered so far, in first-encounter order.
#[derive(Default)]
struct CodegenState {
    variables: IndexMap<NodeId, FreeVariable>,
}

impl CodegenState {
    /// Returns the variable name for a leaf, minting it on first encounter.
    fn bind(&mut self, id: NodeId, array: &ArrayRef) -> String {
        self.variables
            .entry(id)
            .or_insert_with(|| FreeVariable {
                name: format!("x{}", id.raw()),
                dtype: array.read().dtype(),
                array: array.clone(),
            })
            .name
            .clone()
    }

    fn finish(self, body: String) -> GeneratedKernel {
        let (params, arguments): (Vec<_>, Vec<_>) = self
            .variables
            .into_values()
            .map(|var| {
                (
                    KernelParam {
                        name: var.name,
                        dtype: var.dtype,
                    },
                    var.array,
                )
            })
            .unzip();
        GeneratedKernel {
            source: KernelSource { params, body },
            arguments,
        }
    }
}

/// Generates fused kernel source for the graph rooted at `root`.
pub fn generate(root: &GraphNode) -> Result<GeneratedKernel> {
    let mut state = CodegenState::default();
    let body = emit(root, &mut state)?;
    Ok(state.finish(body))
}

fn emit(node: &GraphNode, state: &mut CodegenState) -> Result<String> {
    trace!(node = %node.id(), "codegen: visit");
    match node.state() {
        NodeState::Cached(Value::Array(array)) => Ok(state.bind(node.id(), &array)),
        NodeState::Cached(Value::Scalar(value)) => Ok(value.literal()),
        NodeState::Deferred(expr) => match expr {
            Node::DataLeaf(array) => Ok(state.bind(node.id(), &array)),
            Node::ScalarLeaf(value) => Ok(value.literal()),
            Node::UnaryOp { operand, op } => {
                Ok(format!("{}({})", op.name(), emit(&operand, state)?))
            }
            Node::BinaryOp { lhs, rhs, op } => {
                let lhs = emit(&lhs, state)?;
                let rhs = emit(&rhs, state)?;
                Ok(format!("{}({lhs}, {rhs})", op.name()))
            }
            Node::AssignOp { .. } => Err(UsageError::AssignInKernel { node: node.id() }.into()),
        },
    }
}
