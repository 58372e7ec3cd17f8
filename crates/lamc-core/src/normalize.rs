//! ANF conversion with join points.
//!
//! Transforms a renamed surface tree into [`anf::Exp`], naming every
//! compound subexpression and compiling `if` into a join point so the
//! continuation of the branch is emitted once instead of being duplicated
//! into both arms.
//!
//! Two implementations live here:
//!
//! - [`convert`] is the direct continuation-passing formulation. It is the
//!   readable reference, but it recurses on nested continuations and can
//!   exhaust the native stack on deeply nested input.
//! - [`convert_defunc`] is the canonical version: the same translation with
//!   the continuations defunctionalized into explicit frames and driven by a
//!   three-state dispatch loop, so traversal depth never touches the native
//!   stack. The two are observably equivalent and the test suite holds them
//!   to that.
//!
//! The translation, continuation-style, with `K` the hole for a produced
//! value:
//!
//! - `Int(n)`         -> `K(n)`
//! - `Var(x)`         -> `K(x)`
//! - `Lam(p, b)`      -> `Fun { f, [p], convert(b) ending in Halt, K(f) }`
//!   for fresh `f` (the body converts before `f` is minted)
//! - `App(e1, e2)`    -> convert `e1` to a named value, `e2` to a value,
//!   then `App { r, name, [v2], K(r) }` for fresh `r`
//! - `Bop(op, e1, e2)`-> `Bop { r, op, v1, v2, K(r) }` for fresh `r`
//! - `If(c, t, e)`    -> convert `c` to `vc`, mint join `j` and slot `p`,
//!   then `Join { j, <p>, K(p), If { vc, t*, e* } }` where both arms convert
//!   with the continuation `v -> Jump(j, v)`

use smallvec::smallvec;

use crate::anf::{Exp, Value, Var};
use crate::ast;
use crate::ast::Bop;
use crate::error::CompileError;
use crate::gensym::Gensym;

/// How to consume a produced [`Value`].
enum KFrame {
    /// Waiting on the function value of an application; holds the argument.
    AppArg(ast::Exp),
    /// Waiting on the argument value; holds the resolved function name.
    AppFn(Var),
    /// Waiting on the left operand; holds the right subtree.
    BopRight(ast::Exp, Bop),
    /// Waiting on the right operand; holds the left value.
    BopLeft(Value, Bop),
    /// Waiting on the condition value; holds both arms.
    IfArms(ast::Exp, ast::Exp),
    /// Terminal continuation of a branch arm: jump to the join.
    IfJumpTarget(Var),
}

/// How to consume a produced expression fragment.
enum K2Frame {
    /// A lambda body is in flight; `saved` is the suspended outer value
    /// continuation, resumed once the body fragment lands.
    LamBody { saved: Vec<KFrame>, param: Var },
    /// The lambda's `rest` is in flight; wraps it into the `Fun` node.
    LamRest { name: Var, param: Var, body: Box<Exp> },
    /// The application's `rest` is in flight.
    AppRest { name: Var, fun_name: Var, arg: Value },
    /// The operator's `rest` is in flight.
    BopRest { name: Var, op: Bop, lhs: Value, rhs: Value },
    /// The join body (the shared continuation) is in flight.
    IfJoinBody { then: ast::Exp, els: ast::Exp, join: Var, slot: Var, cond: Value },
    /// The then arm is in flight.
    IfThen { els: ast::Exp, join: Var, slot: Var, cond: Value, join_body: Box<Exp> },
    /// The else arm is in flight; completes the `Join`/`If` nest.
    IfElse { then: Box<Exp>, join: Var, slot: Var, cond: Value, join_body: Box<Exp> },
}

enum State {
    /// Start normalizing a subtree.
    Go(ast::Exp),
    /// Deliver a value to the top value-continuation frame.
    ApplyValue(Value),
    /// Deliver a finished fragment to the top fragment frame.
    ApplyExp(Box<Exp>),
}

/// Converts a renamed surface tree to ANF iteratively. This is the
/// canonical converter used by the pipeline.
pub fn convert_defunc(exp: ast::Exp) -> Result<Box<Exp>, CompileError> {
    let mut gensym = Gensym::new();
    let mut k: Vec<KFrame> = Vec::new();
    let mut k2: Vec<K2Frame> = Vec::new();
    let mut state = State::Go(exp);
    loop {
        state = match state {
            State::Go(exp) => match exp {
                ast::Exp::Int(value) => State::ApplyValue(Value::Int(value)),
                ast::Exp::Var(name) => State::ApplyValue(Value::Var(name)),
                ast::Exp::Lam { param, body } => {
                    k2.push(K2Frame::LamBody {
                        saved: std::mem::take(&mut k),
                        param,
                    });
                    State::Go(*body)
                }
                ast::Exp::App { func, arg } => {
                    k.push(KFrame::AppArg(*arg));
                    State::Go(*func)
                }
                ast::Exp::Bop { op, lhs, rhs } => {
                    k.push(KFrame::BopRight(*rhs, op));
                    State::Go(*lhs)
                }
                ast::Exp::If { cond, then, els } => {
                    k.push(KFrame::IfArms(*then, *els));
                    State::Go(*cond)
                }
            },
            State::ApplyValue(value) => match k.pop() {
                None => State::ApplyExp(Box::new(Exp::Halt { value })),
                Some(KFrame::AppArg(arg)) => {
                    let fun_name = named_value(value)?;
                    k.push(KFrame::AppFn(fun_name));
                    State::Go(arg)
                }
                Some(KFrame::AppFn(fun_name)) => {
                    let name = gensym.fresh("tmp");
                    k2.push(K2Frame::AppRest {
                        name: name.clone(),
                        fun_name,
                        arg: value,
                    });
                    State::ApplyValue(Value::Var(name))
                }
                Some(KFrame::BopRight(rhs, op)) => {
                    k.push(KFrame::BopLeft(value, op));
                    State::Go(rhs)
                }
                Some(KFrame::BopLeft(lhs, op)) => {
                    let name = gensym.fresh("tmp");
                    k2.push(K2Frame::BopRest {
                        name: name.clone(),
                        op,
                        lhs,
                        rhs: value,
                    });
                    State::ApplyValue(Value::Var(name))
                }
                Some(KFrame::IfArms(then, els)) => {
                    let join = gensym.fresh("tmp");
                    let slot = gensym.fresh("tmp");
                    k2.push(K2Frame::IfJoinBody {
                        then,
                        els,
                        join,
                        slot: slot.clone(),
                        cond: value,
                    });
                    State::ApplyValue(Value::Var(slot))
                }
                Some(KFrame::IfJumpTarget(join_name)) => State::ApplyExp(Box::new(Exp::Jump {
                    join_name,
                    slot_value: Some(value),
                })),
            },
            State::ApplyExp(fragment) => match k2.pop() {
                None => return Ok(fragment),
                Some(K2Frame::LamBody { saved, param }) => {
                    let name = gensym.fresh("tmp");
                    k = saved;
                    k2.push(K2Frame::LamRest {
                        name: name.clone(),
                        param,
                        body: fragment,
                    });
                    State::ApplyValue(Value::Var(name))
                }
                Some(K2Frame::LamRest { name, param, body }) => State::ApplyExp(Box::new(Exp::Fun {
                    name,
                    params: smallvec![param],
                    body,
                    rest: fragment,
                })),
                Some(K2Frame::AppRest { name, fun_name, arg }) => State::ApplyExp(Box::new(Exp::App {
                    name,
                    fun_name,
                    args: vec![arg],
                    rest: fragment,
                })),
                Some(K2Frame::BopRest { name, op, lhs, rhs }) => State::ApplyExp(Box::new(Exp::Bop {
                    name,
                    op,
                    lhs,
                    rhs,
                    rest: fragment,
                })),
                Some(K2Frame::IfJoinBody { then, els, join, slot, cond }) => {
                    k.push(KFrame::IfJumpTarget(join.clone()));
                    k2.push(K2Frame::IfThen {
                        els,
                        join,
                        slot,
                        cond,
                        join_body: fragment,
                    });
                    State::Go(then)
                }
                Some(K2Frame::IfThen { els, join, slot, cond, join_body }) => {
                    k.push(KFrame::IfJumpTarget(join.clone()));
                    k2.push(K2Frame::IfElse {
                        then: fragment,
                        join,
                        slot,
                        cond,
                        join_body,
                    });
                    State::Go(els)
                }
                Some(K2Frame::IfElse { then, join, slot, cond, join_body }) => {
                    State::ApplyExp(Box::new(Exp::Join {
                        name: join,
                        slot: Some(slot),
                        body: join_body,
                        rest: Box::new(Exp::If {
                            cond,
                            then,
                            els: fragment,
                        }),
                    }))
                }
            },
        };
    }
}

fn named_value(value: Value) -> Result<Var, CompileError> {
    match value {
        Value::Var(name) | Value::Glob(name) => Ok(name),
        Value::Int(_) => Err(CompileError::MustApplyNamed),
    }
}

type Cont = Box<dyn FnOnce(&mut Gensym, Value) -> Result<Box<Exp>, CompileError>>;

/// Converts a renamed surface tree to ANF with native recursion.
///
/// Reference implementation only: it builds one nested closure per
/// continuation and will exhaust the stack on deeply nested input. Use
/// [`convert_defunc`] anywhere input size is not under the caller's control.
pub fn convert(exp: ast::Exp) -> Result<Box<Exp>, CompileError> {
    let mut gensym = Gensym::new();
    go(exp, &mut gensym, halt_cont())
}

fn halt_cont() -> Cont {
    Box::new(|_, value| Ok(Box::new(Exp::Halt { value })))
}

fn jump_cont(join_name: Var) -> Cont {
    Box::new(move |_, value| {
        Ok(Box::new(Exp::Jump {
            join_name,
            slot_value: Some(value),
        }))
    })
}

fn go(exp: ast::Exp, gensym: &mut Gensym, kont: Cont) -> Result<Box<Exp>, CompileError> {
    match exp {
        ast::Exp::Int(value) => kont(gensym, Value::Int(value)),
        ast::Exp::Var(name) => kont(gensym, Value::Var(name)),
        ast::Exp::Lam { param, body } => {
            let body = go(*body, gensym, halt_cont())?;
            let name = gensym.fresh("tmp");
            let rest = kont(gensym, Value::Var(name.clone()))?;
            Ok(Box::new(Exp::Fun {
                name,
                params: smallvec![param],
                body,
                rest,
            }))
        }
        ast::Exp::App { func, arg } => go(
            *func,
            gensym,
            Box::new(move |gensym, fun_value| {
                let fun_name = named_value(fun_value)?;
                go(
                    *arg,
                    gensym,
                    Box::new(move |gensym, arg_value| {
                        let name = gensym.fresh("tmp");
                        let rest = kont(gensym, Value::Var(name.clone()))?;
                        Ok(Box::new(Exp::App {
                            name,
                            fun_name,
                            args: vec![arg_value],
                            rest,
                        }))
                    }),
                )
            }),
        ),
        ast::Exp::Bop { op, lhs, rhs } => go(
            *lhs,
            gensym,
            Box::new(move |gensym, lhs_value| {
                go(
                    *rhs,
                    gensym,
                    Box::new(move |gensym, rhs_value| {
                        let name = gensym.fresh("tmp");
                        let rest = kont(gensym, Value::Var(name.clone()))?;
                        Ok(Box::new(Exp::Bop {
                            name,
                            op,
                            lhs: lhs_value,
                            rhs: rhs_value,
                            rest,
                        }))
                    }),
                )
            }),
        ),
        ast::Exp::If { cond, then, els } => go(
            *cond,
            gensym,
            Box::new(move |gensym, cond_value| {
                let join = gensym.fresh("tmp");
                let slot = gensym.fresh("tmp");
                let body = kont(gensym, Value::Var(slot.clone()))?;
                let then = go(*then, gensym, jump_cont(join.clone()))?;
                let els = go(*els, gensym, jump_cont(join.clone()))?;
                Ok(Box::new(Exp::Join {
                    name: join,
                    slot: Some(slot),
                    body,
                    rest: Box::new(Exp::If {
                        cond: cond_value,
                        then,
                        els,
                    }),
                }))
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Exp as Ast;

    #[test]
    fn names_arithmetic_left_to_right() {
        let expr = Ast::bop(
            Bop::Plus,
            Ast::bop(Bop::Times, Ast::int(2), Ast::int(3)),
            Ast::int(4),
        );
        let anf = convert_defunc(expr).unwrap();
        assert_eq!(
            anf.to_string(),
            "BopExp { tmp0, *, 2, 3, BopExp { tmp1, +, tmp0, 4, HaltExp { tmp1 } } }"
        );
    }

    #[test]
    fn names_lambda_after_its_body() {
        let expr = Ast::app(
            Ast::lam("x", Ast::bop(Bop::Plus, Ast::var("x"), Ast::int(1))),
            Ast::int(1),
        );
        let anf = convert_defunc(expr).unwrap();
        assert_eq!(
            anf.to_string(),
            "FunExp { tmp1, [x], BopExp { tmp0, +, x, 1, HaltExp { tmp0 } }, AppExp \
             { tmp2, tmp1, [1], HaltExp { tmp2 } } }"
        );
    }

    #[test]
    fn compiles_nested_if_into_join_points() {
        // if (if 0+1 then 0 else 1) then ((fn f => f 1) (fn x => x+1)) else 0
        let expr = Ast::if_(
            Ast::if_(
                Ast::bop(Bop::Plus, Ast::int(0), Ast::int(1)),
                Ast::int(0),
                Ast::int(1),
            ),
            Ast::app(
                Ast::lam("f", Ast::app(Ast::var("f"), Ast::int(1))),
                Ast::lam("x", Ast::bop(Bop::Plus, Ast::var("x"), Ast::int(1))),
            ),
            Ast::int(0),
        );
        let anf = convert_defunc(expr).unwrap();
        assert_eq!(
            anf.to_string(),
            "BopExp { tmp0, +, 0, 1, JoinExp { tmp1, <tmp2>, JoinExp { tmp3, <tmp4>, \
             HaltExp { tmp4 }, IfExp { tmp2, FunExp { tmp6, [f], AppExp { tmp5, f, \
             [1], HaltExp { tmp5 } }, FunExp { tmp8, [x], BopExp { tmp7, +, x, 1, \
             HaltExp { tmp7 } }, AppExp { tmp9, tmp6, [tmp8], JumpExp { tmp3, <tmp9> \
             } } } }, JumpExp { tmp3, <0> } } }, IfExp { tmp0, JumpExp { tmp1, <0> \
             }, JumpExp { tmp1, <1> } } } }"
        );
    }

    #[test]
    fn direct_and_defunctionalized_converters_agree() {
        let expr = Ast::if_(
            Ast::if_(
                Ast::bop(Bop::Plus, Ast::int(0), Ast::int(1)),
                Ast::int(0),
                Ast::int(1),
            ),
            Ast::app(
                Ast::lam("f", Ast::app(Ast::var("f"), Ast::int(1))),
                Ast::lam("x", Ast::bop(Bop::Plus, Ast::var("x"), Ast::int(1))),
            ),
            Ast::int(0),
        );
        let direct = convert(expr.clone()).unwrap();
        let defunc = convert_defunc(expr).unwrap();
        assert_eq!(direct.to_string(), defunc.to_string());
    }

    #[test]
    fn applying_an_integer_is_rejected() {
        let expr = Ast::app(Ast::int(1), Ast::int(2));
        assert_eq!(convert_defunc(expr), Err(CompileError::MustApplyNamed));
        let expr = Ast::app(Ast::int(1), Ast::int(2));
        assert_eq!(convert(expr), Err(CompileError::MustApplyNamed));
    }

    #[test]
    fn deep_operator_chain_converts_iteratively() {
        let mut expr = Ast::int(1);
        for _ in 0..2_000 {
            expr = Ast::bop(Bop::Plus, Ast::int(1), expr);
        }
        // Swapping in `convert` here overflows the stack; the
        // defunctionalized loop must not.
        let anf = convert_defunc(expr).unwrap();
        assert_eq!(anf.to_string().len(), 67_793);
    }
}
