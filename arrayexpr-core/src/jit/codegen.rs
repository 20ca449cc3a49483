//! Cranelift Code Generation
//!
//! Compiles kernel source to a native scalar function via Cranelift, then
//! applies it across every element of the input arrays.
//!
//! Every kernel has the same ABI: `fn(*const f64) -> f64`. Inputs are
//! converted to `f64` and packed into one buffer per element; the result is
//! cast back to the statically inferred output dtype.

use cranelift::codegen::ir::FuncRef;
use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use tracing::debug;

use super::config::JitConfig;
use super::ir::{Expr, KernelParam, KernelSource};
use super::KernelError;
use crate::array::{DType, HostArray, Shape};
use crate::error::Error;
use crate::graph::{BinaryOperator, UnaryOperator};

/// Type alias for JIT-compiled functions: fn(*const f64) -> f64
type JitFn = unsafe extern "C" fn(*const f64) -> f64;

const POW_SYMBOL: &str = "arrayexpr_pow";
const LOG_SYMBOL: &str = "arrayexpr_log";

extern "C" fn kernel_pow(base: f64, exponent: f64) -> f64 {
    base.powf(exponent)
}

extern "C" fn kernel_log(x: f64) -> f64 {
    x.ln()
}

fn codegen_error(err: impl std::fmt::Display) -> KernelError {
    KernelError::Codegen(err.to_string())
}

/// A compiled kernel, callable per element or over whole arrays.
pub struct VectorizedKernel {
    /// The JIT module (keeps code alive)
    _module: JITModule,
    /// Function pointer
    func_ptr: JitFn,
    params: Vec<KernelParam>,
    output: DType,
}

impl VectorizedKernel {
    pub fn params(&self) -> &[KernelParam] {
        &self.params
    }

    pub fn num_inputs(&self) -> usize {
        self.params.len()
    }

    /// Element type of the arrays `call` returns.
    pub fn output_dtype(&self) -> DType {
        self.output
    }

    /// Call the compiled function on one element per parameter
    pub fn call_scalar(&self, inputs: &[f64]) -> Result<f64, KernelError> {
        if inputs.len() != self.params.len() {
            return Err(KernelError::InputCount {
                expected: self.params.len(),
                got: inputs.len(),
            });
        }
        Ok(self.invoke(inputs))
    }

    fn invoke(&self, inputs: &[f64]) -> f64 {
        // SAFETY: callers pass exactly one f64 per parameter, which is all the
        // compiled body loads.
        unsafe { (self.func_ptr)(inputs.as_ptr()) }
    }

    /// Applies the kernel elementwise.
    ///
    /// Inputs must match the declared parameter count and dtypes, and share
    /// one shape (rank-0 inputs broadcast).
    pub fn call(&self, inputs: &[&HostArray]) -> Result<HostArray, Error> {
        if inputs.len() != self.params.len() {
            return Err(KernelError::InputCount {
                expected: self.params.len(),
                got: inputs.len(),
            }
            .into());
        }
        let mut shape = Shape::scalar();
        for (param, input) in self.params.iter().zip(inputs) {
            if input.dtype() != param.dtype {
                return Err(KernelError::InputType {
                    name: param.name.clone(),
                    expected: param.dtype,
                    got: input.dtype(),
                }
                .into());
            }
            shape = shape.broadcast(input.shape())?;
        }

        let columns: Vec<Vec<f64>> = inputs.iter().map(|input| input.to_f64_vec()).collect();
        let len = shape.num_elements();
        let mut args = vec![0.0; columns.len()];
        let mut results = Vec::with_capacity(len);
        for i in 0..len {
            for (slot, column) in args.iter_mut().zip(&columns) {
                *slot = column[if column.len() == 1 { 0 } else { i }];
            }
            results.push(self.invoke(&args));
        }
        Ok(HostArray::from_f64_as(shape, results, self.output)?)
    }
}

/// Host functions kernels may call.
struct Imports {
    pow: FuncRef,
    log: FuncRef,
}

/// JIT compiler using Cranelift
pub struct JitCompiler {
    /// ISA for the current platform
    isa: isa::OwnedTargetIsa,
}

impl JitCompiler {
    /// Create a new JIT compiler for the host platform with default settings
    pub fn new() -> Result<Self, KernelError> {
        Self::with_config(&JitConfig::default())
    }

    pub fn with_config(config: &JitConfig) -> Result<Self, KernelError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", config.opt_level.as_str())
            .map_err(codegen_error)?;

        let isa_builder = cranelift_native::builder()
            .map_err(|e| KernelError::Codegen(format!("failed to create ISA builder: {e}")))?;

        let flags = settings::Flags::new(flag_builder);
        let isa = isa_builder
            .finish(flags)
            .map_err(|e| KernelError::Codegen(format!("failed to build ISA: {e}")))?;

        Ok(Self { isa })
    }

    /// Compile kernel source to native code
    pub fn compile(&self, source: &KernelSource) -> Result<VectorizedKernel, KernelError> {
        let expr = source.parse()?;
        let output = expr.dtype(&source.params)?;
        debug!(
            inputs = source.num_inputs(),
            signature = %source.signature(),
            body = %source.body,
            "compiling fused kernel"
        );

        let mut jit_builder =
            JITBuilder::with_isa(self.isa.clone(), cranelift_module::default_libcall_names());
        jit_builder.symbol(POW_SYMBOL, kernel_pow as *const u8);
        jit_builder.symbol(LOG_SYMBOL, kernel_log as *const u8);
        let mut module = JITModule::new(jit_builder);

        // Create function signature: fn(*const f64) -> f64
        let mut ctx = module.make_context();
        let ptr_type = module.target_config().pointer_type();
        ctx.func.signature.params.push(AbiParam::new(ptr_type));
        ctx.func.signature.returns.push(AbiParam::new(types::F64));

        let func_id = module
            .declare_function("kernel", Linkage::Local, &ctx.func.signature)
            .map_err(codegen_error)?;
        let pow_id = declare_import(&mut module, POW_SYMBOL, 2)?;
        let log_id = declare_import(&mut module, LOG_SYMBOL, 1)?;

        let mut builder_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
        let imports = Imports {
            pow: module.declare_func_in_func(pow_id, builder.func),
            log: module.declare_func_in_func(log_id, builder.func),
        };

        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);

        let input_ptr = builder.block_params(entry_block)[0];
        let result = lower(&expr, &mut builder, input_ptr, &imports)?;
        builder.ins().return_(&[result]);
        builder.finalize();

        module
            .define_function(func_id, &mut ctx)
            .map_err(codegen_error)?;
        module.clear_context(&mut ctx);
        module.finalize_definitions().map_err(codegen_error)?;

        let code_ptr = module.get_finalized_function(func_id);
        // SAFETY: the function was declared above with exactly this signature.
        let func_ptr: JitFn = unsafe { std::mem::transmute(code_ptr) };

        Ok(VectorizedKernel {
            _module: module,
            func_ptr,
            params: source.params.clone(),
            output,
        })
    }
}

fn declare_import(module: &mut JITModule, name: &str, arity: usize) -> Result<FuncId, KernelError> {
    let mut sig = module.make_signature();
    for _ in 0..arity {
        sig.params.push(AbiParam::new(types::F64));
    }
    sig.returns.push(AbiParam::new(types::F64));
    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(codegen_error)
}

fn lower(
    expr: &Expr,
    builder: &mut FunctionBuilder,
    inputs: Value,
    imports: &Imports,
) -> Result<Value, KernelError> {
    let value = match expr {
        Expr::Param(index) => {
            // Parameters are packed f64s, 8 bytes apart
            let offset = (*index * 8) as i32;
            builder.ins().load(types::F64, MemFlags::new(), inputs, offset)
        }

        Expr::Const(value) => builder.ins().f64const(value.as_f64()),

        Expr::Unary(op, operand) => {
            let operand = lower(operand, builder, inputs, imports)?;
            match op {
                UnaryOperator::Abs => builder.ins().fabs(operand),
                UnaryOperator::Neg => builder.ins().fneg(operand),
                UnaryOperator::Log => {
                    let call = builder.ins().call(imports.log, &[operand]);
                    builder.inst_results(call)[0]
                }
            }
        }

        Expr::Binary(op, lhs, rhs) => {
            let lhs = lower(lhs, builder, inputs, imports)?;
            let rhs = lower(rhs, builder, inputs, imports)?;
            match op {
                BinaryOperator::Add => builder.ins().fadd(lhs, rhs),
                BinaryOperator::Sub => builder.ins().fsub(lhs, rhs),
                BinaryOperator::Mul => builder.ins().fmul(lhs, rhs),
                BinaryOperator::Div => builder.ins().fdiv(lhs, rhs),
                BinaryOperator::Pow => {
                    let call = builder.ins().call(imports.pow, &[lhs, rhs]);
                    builder.inst_results(call)[0]
                }
                // Comparisons return 0.0 or 1.0
                BinaryOperator::Le => {
                    let cmp = builder.ins().fcmp(FloatCC::LessThanOrEqual, lhs, rhs);
                    let int_val = builder.ins().uextend(types::I64, cmp);
                    builder.ins().fcvt_from_uint(types::F64, int_val)
                }
                BinaryOperator::GetItem => return Err(KernelError::UnsupportedOp(op.name())),
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Scalar;

    fn source(params: &[(&str, DType)], body: &str) -> KernelSource {
        KernelSource {
            params: params
                .iter()
                .map(|(name, dtype)| KernelParam {
                    name: name.to_string(),
                    dtype: *dtype,
                })
                .collect(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_simple_add() {
        let compiler = JitCompiler::new().unwrap();
        let kernel = compiler
            .compile(&source(&[("x", DType::Float64), ("y", DType::Float64)], "add(x, y)"))
            .unwrap();

        assert_eq!(kernel.call_scalar(&[5.0, 3.0]).unwrap(), 8.0);
    }

    #[test]
    fn test_complex_expr() {
        // (x + y) * 2
        let compiler = JitCompiler::new().unwrap();
        let kernel = compiler
            .compile(&source(
                &[("x", DType::Float64), ("y", DType::Float64)],
                "mul(add(x, y), 2.0)",
            ))
            .unwrap();

        assert_eq!(kernel.call_scalar(&[5.0, 3.0]).unwrap(), 16.0);
    }

    #[test]
    fn unoptimized_config_compiles() {
        let config = JitConfig::from_json(r#"{"opt_level": "none"}"#).unwrap();
        let compiler = JitCompiler::with_config(&config).unwrap();
        let kernel = compiler
            .compile(&source(&[("x", DType::Float64)], "div(x, 4)"))
            .unwrap();
        assert_eq!(kernel.call_scalar(&[2.0]).unwrap(), 0.5);
    }

    #[test]
    fn scalar_call_checks_arity() {
        let compiler = JitCompiler::new().unwrap();
        let kernel = compiler
            .compile(&source(&[("x", DType::Float64), ("y", DType::Float64)], "sub(x, y)"))
            .unwrap();
        assert_eq!(
            kernel.call_scalar(&[1.0]),
            Err(KernelError::InputCount { expected: 2, got: 1 })
        );
        assert_eq!(kernel.call_scalar(&[1.0, 0.25]), Ok(0.75));
    }

    #[test]
    fn imported_functions() {
        let compiler = JitCompiler::new().unwrap();
        let kernel = compiler
            .compile(&source(&[("x", DType::Float64)], "add(pow(x, 2), log(1.0))"))
            .unwrap();
        assert_eq!(kernel.call_scalar(&[3.0]).unwrap(), 9.0);
    }

    #[test]
    fn vectorized_call_casts_to_inferred_dtype() {
        let compiler = JitCompiler::new().unwrap();
        let kernel = compiler
            .compile(&source(
                &[("a", DType::Int64), ("b", DType::Int64)],
                "add(a, mul(b, 2))",
            ))
            .unwrap();
        assert_eq!(kernel.output_dtype(), DType::Int64);

        let a = HostArray::from_vec(vec![1_i64, 2, 3]);
        let b = HostArray::from_vec(vec![10_i64, 20, 30]);
        let result = kernel.call(&[&a, &b]).unwrap();
        assert_eq!(result.dtype(), DType::Int64);
        assert_eq!(result.to_i64_vec(), vec![21, 42, 63]);
    }

    #[test]
    fn comparison_and_unary_kernels() {
        let compiler = JitCompiler::new().unwrap();
        let kernel = compiler
            .compile(&source(&[("x", DType::Float64)], "le(abs(neg(x)), 2.0)"))
            .unwrap();
        let x = HostArray::from_vec(vec![-3.0, 1.0, 2.0]);
        let result = kernel.call(&[&x]).unwrap();
        assert_eq!(result.to_bool_vec(), vec![false, true, true]);
    }

    #[test]
    fn rank_zero_inputs_broadcast() {
        let compiler = JitCompiler::new().unwrap();
        let kernel = compiler
            .compile(&source(&[("x", DType::Float64), ("s", DType::Float64)], "sub(x, s)"))
            .unwrap();
        let x = HostArray::from_vec(vec![1.0, 2.0]);
        let s = HostArray::from_scalar(Scalar::Float(0.5));
        assert_eq!(kernel.call(&[&x, &s]).unwrap().to_f64_vec(), vec![0.5, 1.5]);
    }

    #[test]
    fn input_validation() {
        let compiler = JitCompiler::new().unwrap();
        let kernel = compiler
            .compile(&source(&[("x", DType::Int64), ("y", DType::Int64)], "add(x, y)"))
            .unwrap();
        let x = HostArray::from_vec(vec![1_i64, 2]);
        let y = HostArray::from_vec(vec![1_i64, 2, 3]);
        let f = HostArray::from_vec(vec![1.0, 2.0]);

        assert!(matches!(
            kernel.call(&[&x]),
            Err(Error::Kernel(KernelError::InputCount { expected: 2, got: 1 }))
        ));
        assert!(matches!(
            kernel.call(&[&x, &f]),
            Err(Error::Kernel(KernelError::InputType { .. }))
        ));
        assert!(matches!(kernel.call(&[&x, &y]), Err(Error::Array(_))));
    }

    #[test]
    fn getitem_is_rejected() {
        let compiler = JitCompiler::new().unwrap();
        let result = compiler.compile(&source(&[("x", DType::Int64)], "getitem(x, 0)"));
        assert!(matches!(result, Err(KernelError::UnsupportedOp("getitem"))));
    }
}
