//! A-normal form IR with join points.
//!
//! After conversion every compound subexpression is bound to a named
//! temporary, so evaluation order is syntactically explicit. Control flow
//! inside a function is expressed with local [`Join`](Exp::Join) blocks and
//! [`Jump`](Exp::Jump)s into them; [`Tuple`](Exp::Tuple) and
//! [`Proj`](Exp::Proj) appear once closure conversion has made environments
//! explicit.
//!
//! Invariants established by the passes that produce this form:
//!
//! - every binder is globally unique across the tree;
//! - every `Var` refers to an enclosing binder (or a free variable that
//!   closure conversion will supply);
//! - a `Jump` occurs only inside the scope of the `Join` it targets, and
//!   passes a value exactly when the join declares a slot;
//! - `Halt` sits exactly where a continuation terminates.
//!
//! Like the surface tree, this tree can be very deep, so [`Display`]
//! renders through an explicit work stack rather than recursing.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ast::Bop;

/// Variable names are plain interned-by-nothing strings; uniqueness comes
/// from the fresh-name counters, not from the representation.
pub type Var = String;

/// An atomic value: already evaluated, safe to duplicate syntactically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    /// A local temporary or parameter.
    Var(Var),
    /// A top-level function name; appears only after closure conversion.
    Glob(Var),
}

impl Value {
    pub fn var(name: impl Into<Var>) -> Value {
        Value::Var(name.into())
    }

    pub fn glob(name: impl Into<Var>) -> Value {
        Value::Glob(name.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{}", value),
            Value::Var(name) | Value::Glob(name) => f.write_str(name),
        }
    }
}

/// An ANF expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exp {
    /// Terminates the current continuation with a value.
    Halt { value: Value },
    /// `name(params) = body`, in scope as a first-class value in `rest`.
    Fun {
        name: Var,
        params: SmallVec<[Var; 2]>,
        body: Box<Exp>,
        rest: Box<Exp>,
    },
    /// A labeled local block. The optional `slot` is the single parameter
    /// the block receives from its jump sites.
    Join {
        name: Var,
        slot: Option<Var>,
        body: Box<Exp>,
        rest: Box<Exp>,
    },
    /// Transfers control to a join point, passing a value iff the target
    /// declares a slot.
    Jump {
        join_name: Var,
        slot_value: Option<Value>,
    },
    /// Calls `fun_name(args)`, binds the result to `name`.
    App {
        name: Var,
        fun_name: Var,
        args: Vec<Value>,
        rest: Box<Exp>,
    },
    /// Arithmetic binding.
    Bop {
        name: Var,
        op: Bop,
        lhs: Value,
        rhs: Value,
        rest: Box<Exp>,
    },
    /// Branch. After conversion both arms terminate in jumps.
    If {
        cond: Value,
        then: Box<Exp>,
        els: Box<Exp>,
    },
    /// Heap-allocates a tuple and binds its address to `name`.
    Tuple {
        name: Var,
        values: Vec<Value>,
        rest: Box<Exp>,
    },
    /// Reads slot `index` of the tuple bound to `tuple`.
    Proj {
        name: Var,
        tuple: Var,
        index: usize,
        rest: Box<Exp>,
    },
}

impl Exp {
    pub fn halt(value: Value) -> Exp {
        Exp::Halt { value }
    }

    pub fn fun(
        name: impl Into<Var>,
        params: impl IntoIterator<Item = &'static str>,
        body: Exp,
        rest: Exp,
    ) -> Exp {
        Exp::Fun {
            name: name.into(),
            params: params.into_iter().map(Var::from).collect(),
            body: Box::new(body),
            rest: Box::new(rest),
        }
    }

    pub fn join(name: impl Into<Var>, slot: Option<&str>, body: Exp, rest: Exp) -> Exp {
        Exp::Join {
            name: name.into(),
            slot: slot.map(Var::from),
            body: Box::new(body),
            rest: Box::new(rest),
        }
    }

    pub fn jump(join_name: impl Into<Var>, slot_value: Option<Value>) -> Exp {
        Exp::Jump {
            join_name: join_name.into(),
            slot_value,
        }
    }

    pub fn app(
        name: impl Into<Var>,
        fun_name: impl Into<Var>,
        args: impl IntoIterator<Item = Value>,
        rest: Exp,
    ) -> Exp {
        Exp::App {
            name: name.into(),
            fun_name: fun_name.into(),
            args: args.into_iter().collect(),
            rest: Box::new(rest),
        }
    }

    pub fn bop(name: impl Into<Var>, op: Bop, lhs: Value, rhs: Value, rest: Exp) -> Exp {
        Exp::Bop {
            name: name.into(),
            op,
            lhs,
            rhs,
            rest: Box::new(rest),
        }
    }

    pub fn if_(cond: Value, then: Exp, els: Exp) -> Exp {
        Exp::If {
            cond,
            then: Box::new(then),
            els: Box::new(els),
        }
    }

    pub fn tuple(name: impl Into<Var>, values: impl IntoIterator<Item = Value>, rest: Exp) -> Exp {
        Exp::Tuple {
            name: name.into(),
            values: values.into_iter().collect(),
            rest: Box::new(rest),
        }
    }

    pub fn proj(name: impl Into<Var>, tuple: impl Into<Var>, index: usize, rest: Exp) -> Exp {
        Exp::Proj {
            name: name.into(),
            tuple: tuple.into(),
            index,
            rest: Box::new(rest),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str("]")
}

fn write_option<T: fmt::Display>(f: &mut fmt::Formatter<'_>, item: &Option<T>) -> fmt::Result {
    match item {
        Some(item) => write!(f, "<{}>", item),
        None => f.write_str("<>"),
    }
}

enum Item<'a> {
    Exp(&'a Exp),
    Text(&'static str),
}

impl fmt::Display for Exp {
    /// Record-like rendering, e.g.
    /// `BopExp { tmp0, +, 1, 2, HaltExp { tmp0 } }`. Lists render as
    /// `[a, b, c]`, optional slots as `<x>` or `<>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![Item::Exp(self)];
        while let Some(item) = stack.pop() {
            let exp = match item {
                Item::Text(text) => {
                    f.write_str(text)?;
                    continue;
                }
                Item::Exp(exp) => exp,
            };
            match exp {
                Exp::Halt { value } => write!(f, "HaltExp {{ {} }}", value)?,
                Exp::Fun {
                    name,
                    params,
                    body,
                    rest,
                } => {
                    write!(f, "FunExp {{ {}, ", name)?;
                    write_list(f, params)?;
                    f.write_str(", ")?;
                    stack.push(Item::Text(" }"));
                    stack.push(Item::Exp(rest));
                    stack.push(Item::Text(", "));
                    stack.push(Item::Exp(body));
                }
                Exp::Join {
                    name,
                    slot,
                    body,
                    rest,
                } => {
                    write!(f, "JoinExp {{ {}, ", name)?;
                    write_option(f, slot)?;
                    f.write_str(", ")?;
                    stack.push(Item::Text(" }"));
                    stack.push(Item::Exp(rest));
                    stack.push(Item::Text(", "));
                    stack.push(Item::Exp(body));
                }
                Exp::Jump {
                    join_name,
                    slot_value,
                } => {
                    write!(f, "JumpExp {{ {}, ", join_name)?;
                    write_option(f, slot_value)?;
                    f.write_str(" }")?;
                }
                Exp::App {
                    name,
                    fun_name,
                    args,
                    rest,
                } => {
                    write!(f, "AppExp {{ {}, {}, ", name, fun_name)?;
                    write_list(f, args)?;
                    f.write_str(", ")?;
                    stack.push(Item::Text(" }"));
                    stack.push(Item::Exp(rest));
                }
                Exp::Bop {
                    name,
                    op,
                    lhs,
                    rhs,
                    rest,
                } => {
                    write!(f, "BopExp {{ {}, {}, {}, {}, ", name, op, lhs, rhs)?;
                    stack.push(Item::Text(" }"));
                    stack.push(Item::Exp(rest));
                }
                Exp::If { cond, then, els } => {
                    write!(f, "IfExp {{ {}, ", cond)?;
                    stack.push(Item::Text(" }"));
                    stack.push(Item::Exp(els));
                    stack.push(Item::Text(", "));
                    stack.push(Item::Exp(then));
                }
                Exp::Tuple { name, values, rest } => {
                    write!(f, "TupleExp {{ {}, ", name)?;
                    write_list(f, values)?;
                    f.write_str(", ")?;
                    stack.push(Item::Text(" }"));
                    stack.push(Item::Exp(rest));
                }
                Exp::Proj {
                    name,
                    tuple,
                    index,
                    rest,
                } => {
                    write!(f, "ProjExp {{ {}, {}, {}, ", name, tuple, index)?;
                    stack.push(Item::Text(" }"));
                    stack.push(Item::Exp(rest));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Bop;

    #[test]
    fn renders_record_syntax() {
        let exp = Exp::bop(
            "tmp0",
            Bop::Plus,
            Value::Int(1),
            Value::Int(2),
            Exp::halt(Value::var("tmp0")),
        );
        assert_eq!(
            exp.to_string(),
            "BopExp { tmp0, +, 1, 2, HaltExp { tmp0 } }"
        );
    }

    #[test]
    fn renders_join_slots_and_lists() {
        let exp = Exp::join(
            "j",
            Some("x"),
            Exp::halt(Value::var("x")),
            Exp::app(
                "r",
                "f",
                [Value::Int(1), Value::var("g")],
                Exp::jump("j", Some(Value::var("r"))),
            ),
        );
        assert_eq!(
            exp.to_string(),
            "JoinExp { j, <x>, HaltExp { x }, \
             AppExp { r, f, [1, g], JumpExp { j, <r> } } }"
        );
    }

    #[test]
    fn renders_slotless_jump_and_tuple() {
        let exp = Exp::tuple(
            "t",
            [Value::glob("f"), Value::var("a")],
            Exp::proj("p", "t", 0, Exp::jump("j", None)),
        );
        assert_eq!(
            exp.to_string(),
            "TupleExp { t, [f, a], ProjExp { p, t, 0, JumpExp { j, <> } } }"
        );
    }

    #[test]
    fn deep_tree_renders_without_overflowing() {
        let mut exp = Exp::halt(Value::Int(0));
        for i in 0..2_000 {
            exp = Exp::bop(format!("t{}", i), Bop::Plus, Value::Int(1), Value::Int(1), exp);
        }
        assert!(exp.to_string().len() > 2_000);
    }

    #[test]
    fn serde_roundtrip() {
        let exp = Exp::fun(
            "f",
            ["a", "b"],
            Exp::halt(Value::var("a")),
            Exp::halt(Value::glob("f")),
        );
        let json = serde_json::to_string(&exp).unwrap();
        let back: Exp = serde_json::from_str(&json).unwrap();
        assert_eq!(exp, back);
    }
}
