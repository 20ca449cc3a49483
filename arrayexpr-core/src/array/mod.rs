//! Host Array Collaborator
//!
//! Concrete arrays the deferred graph materializes into. The graph never
//! inspects array layout; it only calls the elementwise kernels, the `sum`
//! reduction, index get/set and the dtype descriptor exposed here.
//!
//! Failures raised here are returned to graph callers unchanged.

mod dtype;
mod host;
mod index;
mod scalar;
mod shape;

pub use dtype::DType;
pub use host::{ArrayRef, Element, HostArray};
pub use index::IndexKey;
pub use scalar::Scalar;
pub use shape::Shape;

use thiserror::Error;

/// Errors raised by array kernels.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArrayError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("data length ({len}) does not match shape {shape:?}")]
    LengthMismatch { len: usize, shape: Vec<usize> },

    #[error("index {index} is out of bounds for {len} elements")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("values of dtype {0} cannot be used as an index")]
    InvalidKey(DType),

    #[error("integers to negative integer powers are not allowed")]
    NegativeIntegerPower,

    #[error("operation `{op}` is not supported for dtype {dtype}")]
    Unsupported { op: &'static str, dtype: DType },
}
