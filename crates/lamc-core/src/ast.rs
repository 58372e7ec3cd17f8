//! Surface syntax tree.
//!
//! [`Exp`] is the expression form produced by the parser: an untyped lambda
//! calculus with integer literals, binary arithmetic, conditionals, and
//! single-parameter functions. Every node exclusively owns its children, so
//! the tree is a plain ownership tree with no sharing.
//!
//! Source programs can nest thousands of levels deep, which rules out
//! recursive traversals anywhere in the pipeline; the [`Display`]
//! implementation renders through an explicit work stack for the same
//! reason.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bop {
    Plus,
    Minus,
    Times,
}

impl fmt::Display for Bop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bop::Plus => "+",
            Bop::Minus => "-",
            Bop::Times => "*",
        })
    }
}

/// A surface expression.
///
/// Programs evaluate to a single `i64`. Conditionals treat zero as false and
/// everything else as true. Application is curried by construction: a
/// multi-argument call is a chain of single-argument `App` nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exp {
    Int(i64),
    Var(String),
    Lam {
        param: String,
        body: Box<Exp>,
    },
    App {
        func: Box<Exp>,
        arg: Box<Exp>,
    },
    Bop {
        op: Bop,
        lhs: Box<Exp>,
        rhs: Box<Exp>,
    },
    If {
        cond: Box<Exp>,
        then: Box<Exp>,
        els: Box<Exp>,
    },
}

impl Exp {
    pub fn int(value: i64) -> Exp {
        Exp::Int(value)
    }

    pub fn var(name: impl Into<String>) -> Exp {
        Exp::Var(name.into())
    }

    pub fn lam(param: impl Into<String>, body: Exp) -> Exp {
        Exp::Lam {
            param: param.into(),
            body: Box::new(body),
        }
    }

    pub fn app(func: Exp, arg: Exp) -> Exp {
        Exp::App {
            func: Box::new(func),
            arg: Box::new(arg),
        }
    }

    pub fn bop(op: Bop, lhs: Exp, rhs: Exp) -> Exp {
        Exp::Bop {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn if_(cond: Exp, then: Exp, els: Exp) -> Exp {
        Exp::If {
            cond: Box::new(cond),
            then: Box::new(then),
            els: Box::new(els),
        }
    }
}

/// Rendering work items: either an expression still to render or literal
/// text that closes an already-opened construct.
enum Item<'a> {
    Exp(&'a Exp),
    Text(&'static str),
    Op(Bop),
}

impl fmt::Display for Exp {
    /// Fully parenthesized infix form, e.g. `(fn a => ((a + 1) * 2))`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![Item::Exp(self)];
        while let Some(item) = stack.pop() {
            match item {
                Item::Text(text) => f.write_str(text)?,
                Item::Op(op) => write!(f, "{}", op)?,
                Item::Exp(exp) => match exp {
                    Exp::Int(value) => write!(f, "{}", value)?,
                    Exp::Var(name) => f.write_str(name)?,
                    Exp::Lam { param, body } => {
                        write!(f, "(fn {} => ", param)?;
                        stack.push(Item::Text(")"));
                        stack.push(Item::Exp(body));
                    }
                    Exp::App { func, arg } => {
                        f.write_str("(")?;
                        stack.push(Item::Text(")"));
                        stack.push(Item::Exp(arg));
                        stack.push(Item::Text(" "));
                        stack.push(Item::Exp(func));
                    }
                    Exp::Bop { op, lhs, rhs } => {
                        f.write_str("(")?;
                        stack.push(Item::Text(")"));
                        stack.push(Item::Exp(rhs));
                        stack.push(Item::Text(" "));
                        stack.push(Item::Op(*op));
                        stack.push(Item::Text(" "));
                        stack.push(Item::Exp(lhs));
                    }
                    Exp::If { cond, then, els } => {
                        f.write_str("(if ")?;
                        stack.push(Item::Text(")"));
                        stack.push(Item::Exp(els));
                        stack.push(Item::Text(" else "));
                        stack.push(Item::Exp(then));
                        stack.push(Item::Text(" then "));
                        stack.push(Item::Exp(cond));
                    }
                },
            }
        }
        Ok(())
    }
}
