//! Crate-wide error type.

use thiserror::Error;

use crate::array::ArrayError;
use crate::graph::NodeId;
use crate::jit::KernelError;

/// Misuse of the graph API. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UsageError {
    #[error("node {node} is an index assignment and cannot be compiled into a kernel")]
    AssignInKernel { node: NodeId },

    #[error("node {node} evaluated to a scalar and cannot be index-assigned")]
    ScalarAssignBase { node: NodeId },
}

#[derive(Debug, Error)]
pub enum Error {
    /// Raised by the array kernels; passed through unchanged.
    #[error(transparent)]
    Array(#[from] ArrayError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

pub type Result<T> = std::result::Result<T, Error>;
