//! Hoisting: flattens nested functions and joins into per-function blocks.
//!
//! The output is a list of first-order [`Function`]s, each with an entry
//! block and zero or more labeled [`Block`]s. After this pass no `Fun` or
//! `Join` node remains in any block body, both arms of every `If` end in a
//! `Jump`, and every jump target names a block of the enclosing function --
//! exactly the shape a basic-block backend lowers mechanically.
//!
//! The whole input is first wrapped in `Fun { "main", [], input, Halt(0) }`
//! so the top level is produced like any other function (the `Halt(0)` only
//! fills the rest slot and is discarded). Functions are collected when their
//! body finishes, so inner functions appear before the function that
//! defined them and `main` comes last. Entry, then, and else labels are
//! minted from one shared counter, which interleaves their numbering.
//!
//! Hoisting has no fallible cases; it relies on the invariants the earlier
//! passes established.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::anf::{Exp, Value, Var};
use crate::gensym::Gensym;

/// A labeled basic block: `body` is a tail-form expression containing no
/// `Fun` and no `Join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub name: Var,
    pub slot: Option<Var>,
    pub body: Box<Exp>,
}

impl fmt::Display for Block {
    /// `label <slot>:` followed by the body's ANF rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.name)?;
        match &self.slot {
            Some(slot) => write!(f, "<{}>", slot)?,
            None => f.write_str("<>")?,
        }
        write!(f, ":\n{}", self.body)
    }
}

/// A first-order function: entry block plus labeled blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: Var,
    pub params: SmallVec<[Var; 2]>,
    pub entry: Block,
    pub blocks: Vec<Block>,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for param in &self.params {
            write!(f, " {}", param)?;
        }
        write!(f, " ):\n{}", self.entry)?;
        for block in &self.blocks {
            write!(f, "\n{}", block)?;
        }
        Ok(())
    }
}

/// What to do once the subtree currently in flight comes back processed.
enum Frame {
    /// A function body is in flight; completion mints the entry block,
    /// collects the function, restores the outer join list, and moves on to
    /// the function's `rest` (which replaces the `Fun` node).
    FunBody {
        name: Var,
        params: SmallVec<[Var; 2]>,
        rest: Box<Exp>,
        saved_joins: Vec<Block>,
    },
    /// A join body is in flight; completion appends the block and moves on
    /// to the join's `rest` (which replaces the `Join` node).
    JoinBody {
        name: Var,
        slot: Option<Var>,
        rest: Box<Exp>,
    },
    /// An if's then arm is in flight.
    IfThen { cond: Value, els: Box<Exp> },
    /// An if's else arm is in flight; completion moves both arms into fresh
    /// blocks and leaves slotless jumps behind.
    IfElse { cond: Value, then: Box<Exp> },
    /// A straight-line node whose `rest` is in flight.
    Reattach(Exp),
}

enum State {
    Go(Box<Exp>),
    Done(Box<Exp>),
}

fn set_rest(node: &mut Exp, new_rest: Box<Exp>) {
    match node {
        Exp::App { rest, .. }
        | Exp::Bop { rest, .. }
        | Exp::Tuple { rest, .. }
        | Exp::Proj { rest, .. } => *rest = new_rest,
        _ => unreachable!("only rest-carrying nodes are reattached"),
    }
}

fn detach_rest(mut node: Exp) -> (Exp, Box<Exp>) {
    let placeholder = Box::new(Exp::Halt {
        value: Value::Int(0),
    });
    let rest = match &mut node {
        Exp::App { rest, .. }
        | Exp::Bop { rest, .. }
        | Exp::Tuple { rest, .. }
        | Exp::Proj { rest, .. } => std::mem::replace(rest, placeholder),
        _ => unreachable!("detach_rest is only called on rest-carrying nodes"),
    };
    (node, rest)
}

/// Hoists a closure-converted tree into a flat function list.
pub fn hoist(exp: Box<Exp>) -> Vec<Function> {
    let mut gensym = Gensym::new();
    let mut collected: Vec<Function> = Vec::new();
    let mut joins: Vec<Block> = Vec::new();
    let mut frames: Vec<Frame> = Vec::new();

    let root = Box::new(Exp::Fun {
        name: Var::from("main"),
        params: SmallVec::new(),
        body: exp,
        rest: Box::new(Exp::Halt {
            value: Value::Int(0),
        }),
    });

    let mut state = State::Go(root);
    loop {
        state = match state {
            State::Go(exp) => match *exp {
                Exp::Fun {
                    name,
                    params,
                    body,
                    rest,
                } => {
                    frames.push(Frame::FunBody {
                        name,
                        params,
                        rest,
                        saved_joins: std::mem::take(&mut joins),
                    });
                    State::Go(body)
                }
                Exp::Join {
                    name,
                    slot,
                    body,
                    rest,
                } => {
                    frames.push(Frame::JoinBody { name, slot, rest });
                    State::Go(body)
                }
                Exp::If { cond, then, els } => {
                    frames.push(Frame::IfThen { cond, els });
                    State::Go(then)
                }
                node @ (Exp::App { .. }
                | Exp::Bop { .. }
                | Exp::Tuple { .. }
                | Exp::Proj { .. }) => {
                    let (node, rest) = detach_rest(node);
                    frames.push(Frame::Reattach(node));
                    State::Go(rest)
                }
                node @ (Exp::Halt { .. } | Exp::Jump { .. }) => State::Done(Box::new(node)),
            },
            State::Done(done) => match frames.pop() {
                // Only the bootstrap's unreachable rest lands here.
                None => return collected,
                Some(Frame::FunBody {
                    name,
                    params,
                    rest,
                    saved_joins,
                }) => {
                    let entry = Block {
                        name: gensym.fresh("entry"),
                        slot: None,
                        body: done,
                    };
                    collected.push(Function {
                        name,
                        params,
                        entry,
                        blocks: std::mem::replace(&mut joins, saved_joins),
                    });
                    State::Go(rest)
                }
                Some(Frame::JoinBody { name, slot, rest }) => {
                    joins.push(Block {
                        name,
                        slot,
                        body: done,
                    });
                    State::Go(rest)
                }
                Some(Frame::IfThen { cond, els }) => {
                    frames.push(Frame::IfElse { cond, then: done });
                    State::Go(els)
                }
                Some(Frame::IfElse { cond, then }) => {
                    let then_name = gensym.fresh("then");
                    let else_name = gensym.fresh("else");
                    joins.push(Block {
                        name: then_name.clone(),
                        slot: None,
                        body: then,
                    });
                    joins.push(Block {
                        name: else_name.clone(),
                        slot: None,
                        body: done,
                    });
                    State::Done(Box::new(Exp::If {
                        cond,
                        then: Box::new(Exp::Jump {
                            join_name: then_name,
                            slot_value: None,
                        }),
                        els: Box::new(Exp::Jump {
                            join_name: else_name,
                            slot_value: None,
                        }),
                    }))
                }
                Some(Frame::Reattach(mut node)) => {
                    set_rest(&mut node, done);
                    State::Done(Box::new(node))
                }
            },
        };
    }
}
