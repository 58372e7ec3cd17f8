//! In-process evaluation through LLVM's JIT.

use inkwell::context::Context;
use inkwell::targets::{InitializationConfig, Target};

use lamc_core::hoist::Function;

use crate::error::CodegenError;
use crate::{lower, OptLevel};

/// Lowers `functions`, JIT-compiles the module, and calls `main`.
///
/// The external `malloc` calls emitted for tuples resolve against the
/// process allocator. The module, engine, and context all live and die
/// inside this call; nothing LLVM-typed escapes.
pub fn evaluate(functions: &[Function], opt_level: OptLevel) -> Result<i64, CodegenError> {
    Target::initialize_native(&InitializationConfig::default())
        .map_err(CodegenError::Llvm)?;

    let context = Context::create();
    let module = context.create_module("lamc_program");
    let builder = context.create_builder();
    lower::lower_module(&context, &module, &builder, functions)?;
    module
        .verify()
        .map_err(|e| CodegenError::Llvm(e.to_string()))?;

    if module.get_function("main").is_none() {
        return Err(CodegenError::NoMain);
    }
    let engine = module
        .create_jit_execution_engine(opt_level.into())
        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
    // SAFETY: every lowered function, `main` included, returns i64; `main`
    // takes no parameters because the hoist bootstrap gives it none.
    let result = unsafe {
        let main = engine
            .get_function::<unsafe extern "C" fn() -> i64>("main")
            .map_err(|e| CodegenError::Llvm(e.to_string()))?;
        main.call()
    };
    Ok(result)
}
