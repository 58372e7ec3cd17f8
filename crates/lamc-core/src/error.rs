//! Error types for the compilation pipeline.
//!
//! No error is recoverable inside the pipeline: a failing pass aborts the
//! whole compile and leaves no partial artifact behind. The driver decides
//! whether to keep its session alive (see [`ParseError::fatal`]).

use thiserror::Error;

/// Errors raised by the middle-end passes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A variable occurs free in the program. Raised by alpha-rename on the
    /// first unbound name it encounters.
    #[error("{name} is not in scope")]
    NotInScope { name: String },

    /// An application's function position reduced to an integer. Well-formed
    /// parsed input cannot produce this; it indicates a bug upstream.
    #[error("application must name a function, not an integer")]
    MustApplyNamed,
}

/// A front-end failure.
///
/// `fatal` distinguishes "this line is unusable, skip it" from "the input
/// stream has ended, stop the session"; the interactive driver keys off it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub fatal: bool,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            fatal: true,
        }
    }
}
