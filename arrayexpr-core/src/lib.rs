//! ArrayExpr Core
//!
//! This crate provides deferred (lazy) array expressions. Arithmetic on an
//! array handle records an expression graph instead of computing; the graph
//! is evaluated on demand, rendered as a diagnostic tree, or fused into a
//! single native kernel.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `array`: Host arrays, dtypes, shapes and the elementwise kernels
//! - `graph`: Expression nodes and the shared, cacheable graph node cell
//! - `eval`: Value, text and code-generation evaluators over the graph
//! - `jit`: Cranelift compilation of generated kernel source
//! - `lazy`: The user-facing [`LazyArray`] handle
//!
//! # Example
//!
//! ```rust,ignore
//! use arrayexpr_core::{HostArray, LazyArray};
//!
//! let x = LazyArray::from_data(HostArray::from_vec(vec![1_i64, 2, 3]));
//! let y = LazyArray::from_data(HostArray::from_vec(vec![10_i64, 20, 30]));
//!
//! // Nothing is computed yet
//! let z = &x + &y * 2;
//! println!("{}", z.to_text());
//!
//! // Materialize (and cache) the result
//! assert_eq!(z.to_host()?.to_i64_vec(), vec![21, 42, 63]);
//! ```

pub mod array;
pub mod error;
pub mod eval;
pub mod graph;
pub mod jit;
pub mod lazy;

pub use array::{ArrayError, ArrayRef, DType, HostArray, Scalar, Shape};
pub use error::{Error, Result, UsageError};
pub use graph::{GraphNode, Node, NodeId, Value};
pub use jit::{FusedKernel, JitCompiler, JitConfig, KernelError, KernelSource};
pub use lazy::{IntoNode, LazyArray};
