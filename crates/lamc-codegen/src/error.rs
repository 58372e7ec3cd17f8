//! Codegen error types.

use thiserror::Error;

/// Errors that can occur while lowering to LLVM IR or driving the JIT.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// A value name had no binding in the function being lowered. The
    /// middle end's scope invariants make this unreachable for pipeline
    /// output; hand-built input can trip it.
    #[error("unknown value: {0}")]
    UnknownValue(String),

    /// A jump targeted a label that is not a block of the enclosing
    /// function.
    #[error("unknown block: {0}")]
    UnknownBlock(String),

    /// A call or global value referenced a function the module does not
    /// define.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A conditional whose arms are not both jumps reached the backend.
    #[error("if arms must end in jumps after hoisting")]
    UnsplitIf,

    /// A `Fun` or `Join` node survived into a block body.
    #[error("nested functions and joins must be hoisted before lowering")]
    Unhoisted,

    /// The module does not define `main`.
    #[error("no main function to evaluate")]
    NoMain,

    /// LLVM API failure (builder, verifier, or execution engine).
    #[error("LLVM error: {0}")]
    Llvm(String),
}
