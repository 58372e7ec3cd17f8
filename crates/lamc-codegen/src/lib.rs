//! LLVM backend for hoisted programs.
//!
//! Consumes the flat function list the middle end produces and lowers it to
//! LLVM IR via inkwell, then evaluates it in-process with a JIT execution
//! engine. Every object-language value is a 64-bit integer; tuples live on
//! the heap behind the external `malloc` symbol, eight bytes per slot, with
//! the code pointer of a closure at slot 0.
//!
//! # Modules
//!
//! - [`error`] -- failure modes of lowering and JIT execution
//! - [`lower`] -- per-function, per-block IR emission
//! - [`jit`] -- execution-engine driver

pub mod error;
pub mod jit;
pub mod lower;

pub use error::CodegenError;
pub use jit::evaluate;
pub use lower::lower_to_ir;

use inkwell::OptimizationLevel;

/// Optimization level applied by the execution engine.
///
/// Defaults to `O0`: the programs this backend sees are tiny, and an
/// unoptimized build keeps lowering output predictable in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    #[default]
    O0,
    O1,
    O2,
    O3,
}

impl From<OptLevel> for OptimizationLevel {
    fn from(level: OptLevel) -> OptimizationLevel {
        match level {
            OptLevel::O0 => OptimizationLevel::None,
            OptLevel::O1 => OptimizationLevel::Less,
            OptLevel::O2 => OptimizationLevel::Default,
            OptLevel::O3 => OptimizationLevel::Aggressive,
        }
    }
}
