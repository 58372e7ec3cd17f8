//! Closure conversion: eliminates lexical capture.
//!
//! After this pass every function is closed. Each `Fun` gains a fresh
//! closure parameter in front of its original parameters and opens by
//! projecting its free variables out of that parameter (slot 0 is reserved
//! for the code pointer, free variables sit at slots 1..). At the binding
//! site the function name is rebound to a tuple `[Glob(name), fv1, fv2, ..]`
//! -- the closure record -- shadowing the raw code pointer. Every
//! application projects slot 0 out of the callee closure and calls it with
//! the closure itself prepended to the arguments.
//!
//! The free-variable layout must be reproducible across runs, so the set is
//! kept sorted ([`BTreeSet`]) and projection indices follow that order.
//! Because the input satisfies global binder uniqueness, a deferred removal
//! can never delete an occurrence that a different scope legitimately
//! contributed.

use std::collections::BTreeSet;

use crate::anf::{Exp, Value, Var};
use crate::gensym::Gensym;

/// Collects the names occurring free in `exp`.
///
/// Worklist traversal: value occurrences insert into the set, and every
/// binder schedules a deferred removal that runs once the binder's scope has
/// been fully visited. `Var` and `Glob` occurrences both count -- before
/// hoisting a `Glob` is still a name the enclosing function must supply.
pub fn free_vars(exp: &Exp) -> BTreeSet<Var> {
    enum Task<'a> {
        Node(&'a Exp),
        /// Deferred binder removal; runs after the binder's scope.
        Remove(Vec<Var>),
    }

    fn value_names(free: &mut BTreeSet<Var>, value: &Value) {
        match value {
            Value::Int(_) => {}
            Value::Var(name) | Value::Glob(name) => {
                free.insert(name.clone());
            }
        }
    }

    let mut free = BTreeSet::new();
    let mut worklist = vec![Task::Node(exp)];
    while let Some(task) = worklist.pop() {
        match task {
            Task::Remove(names) => {
                for name in &names {
                    free.remove(name);
                }
            }
            Task::Node(exp) => match exp {
                Exp::Halt { value } => value_names(&mut free, value),
                Exp::Fun {
                    name,
                    params,
                    body,
                    rest,
                } => {
                    worklist.push(Task::Remove(params.to_vec()));
                    worklist.push(Task::Node(body));
                    worklist.push(Task::Remove(vec![name.clone()]));
                    worklist.push(Task::Node(rest));
                }
                Exp::Join {
                    name,
                    slot,
                    body,
                    rest,
                } => {
                    if let Some(slot) = slot {
                        worklist.push(Task::Remove(vec![slot.clone()]));
                    }
                    worklist.push(Task::Node(body));
                    worklist.push(Task::Remove(vec![name.clone()]));
                    worklist.push(Task::Node(rest));
                }
                Exp::Jump { slot_value, .. } => {
                    if let Some(value) = slot_value {
                        value_names(&mut free, value);
                    }
                }
                Exp::App {
                    name,
                    fun_name,
                    args,
                    rest,
                } => {
                    free.insert(fun_name.clone());
                    for value in args {
                        value_names(&mut free, value);
                    }
                    worklist.push(Task::Remove(vec![name.clone()]));
                    worklist.push(Task::Node(rest));
                }
                Exp::Bop {
                    name, lhs, rhs, rest, ..
                } => {
                    value_names(&mut free, lhs);
                    value_names(&mut free, rhs);
                    worklist.push(Task::Remove(vec![name.clone()]));
                    worklist.push(Task::Node(rest));
                }
                Exp::If { cond, then, els } => {
                    value_names(&mut free, cond);
                    worklist.push(Task::Node(then));
                    worklist.push(Task::Node(els));
                }
                Exp::Tuple { name, values, rest } => {
                    for value in values {
                        value_names(&mut free, value);
                    }
                    worklist.push(Task::Remove(vec![name.clone()]));
                    worklist.push(Task::Node(rest));
                }
                Exp::Proj {
                    name, tuple, rest, ..
                } => {
                    free.insert(tuple.clone());
                    worklist.push(Task::Remove(vec![name.clone()]));
                    worklist.push(Task::Node(rest));
                }
            },
        }
    }
    free
}

/// Rebuild frames: each records how to reassemble a node once the child
/// currently in flight comes back converted.
enum Frame {
    /// The function's rewritten `rest` is in flight (visited first).
    FunRest {
        name: Var,
        params: smallvec::SmallVec<[Var; 2]>,
        body: Box<Exp>,
    },
    /// The function's projection-wrapped body is in flight.
    FunBody {
        name: Var,
        params: smallvec::SmallVec<[Var; 2]>,
        rest: Box<Exp>,
    },
    /// The rewritten application's `rest` is in flight; completion wraps it
    /// in `Proj { proj, callee, 0, App { name, proj, args, rest } }`.
    AppRest {
        proj: Var,
        callee: Var,
        name: Var,
        args: Vec<Value>,
    },
    /// A join's `rest` is in flight (visited first).
    JoinRest {
        name: Var,
        slot: Option<Var>,
        body: Box<Exp>,
    },
    /// A join's body is in flight.
    JoinBody {
        name: Var,
        slot: Option<Var>,
        rest: Box<Exp>,
    },
    /// An if's else arm is in flight (visited first).
    IfElse { cond: Value, then: Box<Exp> },
    /// An if's then arm is in flight.
    IfThen { cond: Value, els: Box<Exp> },
    /// A straight-line node whose `rest` is in flight.
    Reattach(Exp),
}

enum State {
    Go(Box<Exp>),
    Done(Box<Exp>),
}

/// Plugs a converted `rest` back into a straight-line node.
fn set_rest(node: &mut Exp, new_rest: Box<Exp>) {
    match node {
        Exp::App { rest, .. }
        | Exp::Bop { rest, .. }
        | Exp::Tuple { rest, .. }
        | Exp::Proj { rest, .. } => *rest = new_rest,
        _ => unreachable!("only rest-carrying nodes are reattached"),
    }
}

/// Closure-converts a whole ANF tree.
pub fn closure_convert(exp: Box<Exp>) -> Box<Exp> {
    let mut gensym = Gensym::new();
    let mut frames: Vec<Frame> = Vec::new();
    let mut state = State::Go(exp);
    loop {
        state = match state {
            State::Go(exp) => match *exp {
                Exp::Halt { value } => State::Done(Box::new(Exp::Halt { value })),
                Exp::Jump {
                    join_name,
                    slot_value,
                } => State::Done(Box::new(Exp::Jump {
                    join_name,
                    slot_value,
                })),
                Exp::Fun {
                    name,
                    mut params,
                    mut body,
                    rest,
                } => {
                    // Free variables of the whole Fun form: those of the
                    // rest (minus the bound name) plus those of the body,
                    // minus the parameters.
                    let mut fv = free_vars(&rest);
                    fv.remove(&name);
                    fv.extend(free_vars(&body));
                    for param in &params {
                        fv.remove(param);
                    }

                    let closure = gensym.fresh("closure");
                    params.insert(0, closure.clone());
                    for (i, var) in fv.iter().enumerate() {
                        body = Box::new(Exp::Proj {
                            name: var.clone(),
                            tuple: closure.clone(),
                            index: i + 1,
                            rest: body,
                        });
                    }

                    let mut values = Vec::with_capacity(fv.len() + 1);
                    values.push(Value::Glob(name.clone()));
                    values.extend(fv.into_iter().map(Value::Var));
                    let rest = Box::new(Exp::Tuple {
                        name: name.clone(),
                        values,
                        rest,
                    });

                    frames.push(Frame::FunRest { name, params, body });
                    State::Go(rest)
                }
                Exp::App {
                    name,
                    fun_name,
                    mut args,
                    rest,
                } => {
                    let proj = gensym.fresh("proj");
                    args.insert(0, Value::Var(fun_name.clone()));
                    frames.push(Frame::AppRest {
                        proj,
                        callee: fun_name,
                        name,
                        args,
                    });
                    State::Go(rest)
                }
                Exp::Join {
                    name,
                    slot,
                    body,
                    rest,
                } => {
                    frames.push(Frame::JoinRest { name, slot, body });
                    State::Go(rest)
                }
                Exp::If { cond, then, els } => {
                    frames.push(Frame::IfElse { cond, then });
                    State::Go(els)
                }
                node @ (Exp::Bop { .. } | Exp::Tuple { .. } | Exp::Proj { .. }) => {
                    let (node, rest) = detach_rest(node);
                    frames.push(Frame::Reattach(node));
                    State::Go(rest)
                }
            },
            State::Done(done) => match frames.pop() {
                None => return done,
                Some(Frame::FunRest { name, params, body }) => {
                    frames.push(Frame::FunBody {
                        name,
                        params,
                        rest: done,
                    });
                    State::Go(body)
                }
                Some(Frame::FunBody { name, params, rest }) => State::Done(Box::new(Exp::Fun {
                    name,
                    params,
                    body: done,
                    rest,
                })),
                Some(Frame::AppRest {
                    proj,
                    callee,
                    name,
                    args,
                }) => State::Done(Box::new(Exp::Proj {
                    name: proj.clone(),
                    tuple: callee,
                    index: 0,
                    rest: Box::new(Exp::App {
                        name,
                        fun_name: proj,
                        args,
                        rest: done,
                    }),
                })),
                Some(Frame::JoinRest { name, slot, body }) => {
                    frames.push(Frame::JoinBody {
                        name,
                        slot,
                        rest: done,
                    });
                    State::Go(body)
                }
                Some(Frame::JoinBody { name, slot, rest }) => State::Done(Box::new(Exp::Join {
                    name,
                    slot,
                    body: done,
                    rest,
                })),
                Some(Frame::IfElse { cond, then }) => {
                    frames.push(Frame::IfThen { cond, els: done });
                    State::Go(then)
                }
                Some(Frame::IfThen { cond, els }) => State::Done(Box::new(Exp::If {
                    cond,
                    then: done,
                    els,
                })),
                Some(Frame::Reattach(mut node)) => {
                    set_rest(&mut node, done);
                    State::Done(Box::new(node))
                }
            },
        };
    }
}

/// Splits a straight-line node from its `rest`, leaving a placeholder.
fn detach_rest(mut node: Exp) -> (Exp, Box<Exp>) {
    let placeholder = Box::new(Exp::Halt {
        value: Value::Int(0),
    });
    let rest = match &mut node {
        Exp::Bop { rest, .. } | Exp::Tuple { rest, .. } | Exp::Proj { rest, .. } => {
            std::mem::replace(rest, placeholder)
        }
        _ => unreachable!("detach_rest is only called on rest-carrying nodes"),
    };
    (node, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Bop;

    #[test]
    fn collects_operands_of_open_arithmetic() {
        let exp = Exp::bop(
            "c",
            Bop::Plus,
            Value::var("a"),
            Value::var("b"),
            Exp::halt(Value::var("c")),
        );
        let vars: Vec<Var> = free_vars(&exp).into_iter().collect();
        assert_eq!(vars, ["a", "b"]);
    }

    #[test]
    fn binders_capture_only_their_own_scope() {
        // fun f(a, b) =
        //   join j <c> = (let t = (b, c, d) in let p = t.0 in p)
        //   in let x = a + e in jump j g
        // in f
        let exp = Exp::fun(
            "f",
            ["a", "b"],
            Exp::join(
                "j",
                Some("c"),
                Exp::tuple(
                    "t",
                    [Value::var("b"), Value::var("c"), Value::var("d")],
                    Exp::proj("p", "t", 0, Exp::halt(Value::var("p"))),
                ),
                Exp::bop(
                    "x",
                    Bop::Plus,
                    Value::var("a"),
                    Value::var("e"),
                    Exp::jump("j", Some(Value::glob("g"))),
                ),
            ),
            Exp::halt(Value::var("f")),
        );
        let vars: Vec<Var> = free_vars(&exp).into_iter().collect();
        assert_eq!(vars, ["d", "e", "g"]);
    }

    #[test]
    fn converts_a_function_with_one_capture() {
        // fun f(x) = (let y = x + a in y) in let r = f(1) in r
        let exp = Exp::fun(
            "f",
            ["x"],
            Exp::bop(
                "y",
                Bop::Plus,
                Value::var("x"),
                Value::var("a"),
                Exp::halt(Value::var("y")),
            ),
            Exp::app("r", "f", [Value::Int(1)], Exp::halt(Value::var("r"))),
        );
        let converted = closure_convert(Box::new(exp));
        assert_eq!(
            converted.to_string(),
            "FunExp { f, [closure0, x], ProjExp { a, closure0, 1, BopExp { y, +, x, \
             a, HaltExp { y } } }, TupleExp { f, [f, a], ProjExp { proj1, f, 0, \
             AppExp { r, proj1, [f, 1], HaltExp { r } } } } }"
        );
    }

    #[test]
    fn nested_functions_capture_through_their_own_closures() {
        // fun f(x) = (fun g(y) = (let z = x + y in z) in g) in f
        let exp = Exp::fun(
            "f",
            ["x"],
            Exp::fun(
                "g",
                ["y"],
                Exp::bop(
                    "z",
                    Bop::Plus,
                    Value::var("x"),
                    Value::var("y"),
                    Exp::halt(Value::var("z")),
                ),
                Exp::halt(Value::var("g")),
            ),
            Exp::halt(Value::var("f")),
        );
        let converted = closure_convert(Box::new(exp));
        assert_eq!(
            converted.to_string(),
            "FunExp { f, [closure0, x], FunExp { g, [closure1, y], ProjExp { x, \
             closure1, 1, BopExp { z, +, x, y, HaltExp { z } } }, TupleExp { g, [g, \
             x], HaltExp { g } } }, TupleExp { f, [f], HaltExp { f } } }"
        );
    }

    #[test]
    fn deep_straight_line_code_converts_iteratively() {
        let mut exp = Exp::halt(Value::var("t1999"));
        for i in (0..2_000).rev() {
            let prev = if i == 0 {
                Value::Int(0)
            } else {
                Value::var(format!("t{}", i - 1))
            };
            exp = Exp::bop(format!("t{}", i), Bop::Plus, prev, Value::Int(1), exp);
        }
        let converted = closure_convert(Box::new(exp));
        assert!(free_vars(&converted).is_empty());
    }
}
