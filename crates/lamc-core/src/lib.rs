//! Core compiler for an untyped lambda calculus with integers, binary
//! arithmetic, conditionals, and first-class closures.
//!
//! Source text is lowered through a fixed sequence of representations:
//!
//! ```text
//! source -> ast::Exp -> renamed ast::Exp -> anf::Exp
//!        -> closure-converted anf::Exp -> Vec<hoist::Function>
//! ```
//!
//! The passes, in order:
//!
//! 1. [`rename::alpha_rename`] -- every bound name becomes globally unique.
//! 2. [`normalize::convert_defunc`] -- A-normal form with join points,
//!    driven by an explicit frame stack so deep inputs cannot exhaust the
//!    native stack.
//! 3. [`closure::closure_convert`] -- free variables become explicit
//!    environment tuples; calls go through projected code pointers.
//! 4. [`hoist::hoist`] -- nested functions and joins flatten into
//!    per-function basic blocks.
//!
//! Everything is single-threaded and synchronous; each pass consumes its
//! input tree and returns the next one. The result of [`compile`] is ready
//! for a basic-block backend (`lamc-codegen` lowers it to LLVM IR).
//!
//! # Modules
//!
//! - [`ast`] -- surface syntax tree
//! - [`lexer`] / [`parser`] -- text front end
//! - [`anf`] -- the ANF IR
//! - [`rename`], [`normalize`], [`closure`], [`hoist`] -- the passes
//! - [`gensym`] -- fresh-name supply
//! - [`error`] -- pipeline error types

pub mod anf;
pub mod ast;
pub mod closure;
pub mod error;
pub mod gensym;
pub mod hoist;
pub mod lexer;
pub mod normalize;
pub mod parser;
pub mod rename;

pub use anf::{Value, Var};
pub use ast::Bop;
pub use error::{CompileError, ParseError};
pub use gensym::Gensym;
pub use hoist::{Block, Function};
pub use parser::parse;

/// Runs the whole middle end: rename, ANF-convert, closure-convert, hoist.
pub fn compile(mut exp: ast::Exp) -> Result<Vec<Function>, CompileError> {
    rename::alpha_rename(&mut exp)?;
    let anf = normalize::convert_defunc(exp)?;
    let converted = closure::closure_convert(anf);
    Ok(hoist::hoist(converted))
}
