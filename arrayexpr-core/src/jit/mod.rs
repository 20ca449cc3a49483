//! JIT Compilation Module
//!
//! This module compiles fused kernel source into native code using
//! Cranelift.
//!
//! # Architecture
//!
//! 1. Code generation renders a deferred graph as [`KernelSource`]
//! 2. The source is parsed back into an expression tree ([`ir`])
//! 3. The tree is lowered to a native scalar function ([`codegen`])
//! 4. The function is applied to every element of the bound arrays

mod codegen;
mod config;
mod ir;

pub use codegen::{JitCompiler, VectorizedKernel};
pub use config::{JitConfig, OptLevel};
pub use ir::{Expr, KernelParam, KernelSource};

use thiserror::Error;
use tracing::debug;

use crate::array::{ArrayRef, DType, HostArray};
use crate::error::Result;
use crate::lazy::LazyArray;

/// Errors raised while parsing, compiling or calling a kernel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("unknown operation `{0}`")]
    UnknownOp(String),

    #[error("`{op}` takes {expected} argument(s), got {got}")]
    Arity {
        op: String,
        expected: usize,
        got: usize,
    },

    #[error("operation `{0}` cannot be compiled")]
    UnsupportedOp(&'static str),

    #[error("operation `{op}` on {dtype} cannot be compiled")]
    UnsupportedType { op: &'static str, dtype: DType },

    #[error("expected {expected} inputs, got {got}")]
    InputCount { expected: usize, got: usize },

    #[error("input `{name}` must be {expected}, got {got}")]
    InputType {
        name: String,
        expected: DType,
        got: DType,
    },

    #[error("code generation failed: {0}")]
    Codegen(String),
}

/// A compiled kernel bound to the arrays it reads.
pub struct FusedKernel {
    kernel: VectorizedKernel,
    source: KernelSource,
    arguments: Vec<ArrayRef>,
}

impl FusedKernel {
    pub fn kernel(&self) -> &VectorizedKernel {
        &self.kernel
    }

    pub fn source(&self) -> &KernelSource {
        &self.source
    }

    /// Runs the kernel over the current contents of its argument buffers.
    pub fn run(&self) -> Result<HostArray> {
        let guards: Vec<_> = self.arguments.iter().map(ArrayRef::read).collect();
        let inputs: Vec<&HostArray> = guards.iter().map(|guard| &**guard).collect();
        self.kernel.call(&inputs)
    }
}

impl JitCompiler {
    /// Generates and compiles one kernel for the whole graph behind `array`.
    pub fn fuse(&self, array: &LazyArray) -> Result<FusedKernel> {
        let generated = array.generate_kernel()?;
        let kernel = self.compile(&generated.source)?;
        debug!(
            node = %array.id(),
            inputs = kernel.num_inputs(),
            output = %kernel.output_dtype(),
            "fused kernel ready"
        );
        Ok(FusedKernel {
            kernel,
            source: generated.source,
            arguments: generated.arguments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, UsageError};

    #[test]
    fn fused_matches_forced() {
        let a = LazyArray::from_data(HostArray::from_vec(vec![1.0, 2.0, 3.0]));
        let b = LazyArray::from_data(HostArray::from_vec(vec![0.5, 0.25, 4.0]));
        let expr = &a + &b + &a * 2.0 + &b * 3.0;

        let compiler = JitCompiler::new().unwrap();
        let fused = compiler.fuse(&expr).unwrap();
        assert_eq!(fused.kernel().num_inputs(), 2);

        let expected = expr.to_host().unwrap();
        assert_eq!(fused.run().unwrap(), expected);
    }

    #[test]
    fn fused_kernel_sees_later_writes() {
        let a = LazyArray::from_data(HostArray::from_vec(vec![1_i64, 2, 3]));
        let doubled = &a * 2;
        let fused = JitCompiler::new().unwrap().fuse(&doubled).unwrap();

        let mut alias = a.clone();
        alias.index_set(0, 10);
        alias.force().unwrap();

        assert_eq!(fused.run().unwrap().to_i64_vec(), vec![20, 4, 6]);
    }

    #[test]
    fn fusing_assignment_is_usage_error() {
        let mut a = LazyArray::from_data(HostArray::from_vec(vec![1_i64, 2]));
        a.index_set(1, 5);
        let result = JitCompiler::new().unwrap().fuse(&a);
        assert!(matches!(
            result,
            Err(Error::Usage(UsageError::AssignInKernel { .. }))
        ));
    }

    #[test]
    fn kernels_reject_what_forcing_rejects() {
        let compiler = JitCompiler::new().unwrap();
        let x = LazyArray::from_data(HostArray::from_vec(vec![1_i64, 2]));

        let inverse = x.pow(-1);
        assert!(matches!(inverse.force(), Err(Error::Array(_))));
        assert!(matches!(
            compiler.fuse(&inverse),
            Err(Error::Kernel(KernelError::UnsupportedType { op: "pow", .. }))
        ));

        let flipped = x.le(1).neg();
        assert!(matches!(flipped.force(), Err(Error::Array(_))));
        assert!(matches!(
            compiler.fuse(&flipped),
            Err(Error::Kernel(KernelError::UnsupportedType { op: "neg", .. }))
        ));

        let squared = x.pow(2);
        let fused = compiler.fuse(&squared).unwrap();
        assert_eq!(fused.run().unwrap(), squared.to_host().unwrap());
    }
}
