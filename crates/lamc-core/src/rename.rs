//! Alpha-rename: scope resolution over the surface tree.
//!
//! Every lambda parameter is renamed to `original + counter`, and every
//! variable reference is rewritten to its current binder's fresh name, so
//! that downstream passes can treat names as globally unique. The first
//! unbound variable aborts the compile with
//! [`CompileError::NotInScope`].
//!
//! The traversal is an explicit LIFO worklist with two task kinds: visit a
//! node, or restore a scope entry once the binder's body has been fully
//! visited. The restore task is what makes shadowing work: entering a lambda
//! saves the shadowed mapping (if any) and leaving it puts that mapping
//! back, or unbinds a name that was never bound before.

use std::collections::HashMap;

use crate::ast::Exp;
use crate::error::CompileError;
use crate::gensym::Gensym;

enum Task<'a> {
    Visit(&'a mut Exp),
    /// Runs after the corresponding lambda body has been visited.
    Restore(String, Option<String>),
}

/// Renames `exp` in place so that every binder is globally unique.
pub fn alpha_rename(exp: &mut Exp) -> Result<(), CompileError> {
    let mut gensym = Gensym::new();
    let mut scope: HashMap<String, String> = HashMap::new();
    let mut worklist = vec![Task::Visit(exp)];
    while let Some(task) = worklist.pop() {
        match task {
            Task::Restore(name, prior) => {
                match prior {
                    Some(fresh) => scope.insert(name, fresh),
                    None => scope.remove(&name),
                };
            }
            Task::Visit(exp) => match exp {
                Exp::Int(_) => {}
                Exp::Var(name) => match scope.get(name.as_str()) {
                    Some(fresh) => *name = fresh.clone(),
                    None => {
                        return Err(CompileError::NotInScope { name: name.clone() });
                    }
                },
                Exp::Lam { param, body } => {
                    let fresh = gensym.fresh(param);
                    let prior = scope.insert(param.clone(), fresh.clone());
                    let original = std::mem::replace(param, fresh);
                    worklist.push(Task::Restore(original, prior));
                    worklist.push(Task::Visit(body));
                }
                Exp::App { func, arg } => {
                    worklist.push(Task::Visit(func));
                    worklist.push(Task::Visit(arg));
                }
                Exp::Bop { lhs, rhs, .. } => {
                    worklist.push(Task::Visit(lhs));
                    worklist.push(Task::Visit(rhs));
                }
                Exp::If { cond, then, els } => {
                    worklist.push(Task::Visit(cond));
                    worklist.push(Task::Visit(then));
                    worklist.push(Task::Visit(els));
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Bop;

    fn inc_lam(param: &str) -> Exp {
        Exp::lam(param, Exp::bop(Bop::Plus, Exp::var(param), Exp::int(1)))
    }

    #[test]
    fn renames_shadowed_binders_apart() {
        // (fn a => (fn b => b + 1) 1 + (fn b => b + 1) 2) 3
        let mut exp = Exp::app(
            Exp::lam(
                "a",
                Exp::bop(
                    Bop::Plus,
                    Exp::app(inc_lam("b"), Exp::int(1)),
                    Exp::app(inc_lam("b"), Exp::int(2)),
                ),
            ),
            Exp::int(3),
        );
        alpha_rename(&mut exp).unwrap();
        assert_eq!(
            exp.to_string(),
            "((fn a0 => (((fn b2 => (b2 + 1)) 1) + ((fn b1 => (b1 + 1)) 2))) 3)"
        );
    }

    #[test]
    fn restores_binding_when_inner_lambda_exits() {
        // (fn a => (a + (fn a => a + 1) 1) + a) 2
        let mut exp = Exp::app(
            Exp::lam(
                "a",
                Exp::bop(
                    Bop::Plus,
                    Exp::bop(
                        Bop::Plus,
                        Exp::var("a"),
                        Exp::app(inc_lam("a"), Exp::int(1)),
                    ),
                    Exp::var("a"),
                ),
            ),
            Exp::int(2),
        );
        alpha_rename(&mut exp).unwrap();
        assert_eq!(
            exp.to_string(),
            "((fn a0 => ((a0 + ((fn a1 => (a1 + 1)) 1)) + a0)) 2)"
        );
    }

    #[test]
    fn reports_the_first_free_variable() {
        let mut exp = Exp::bop(Bop::Plus, Exp::var("x"), Exp::int(1));
        assert_eq!(
            alpha_rename(&mut exp),
            Err(CompileError::NotInScope { name: "x".into() })
        );
    }

    #[test]
    fn free_variable_after_scope_exit_is_caught() {
        // (fn a => a) a -- the second `a` sits outside the lambda.
        let mut exp = Exp::app(Exp::lam("a", Exp::var("a")), Exp::var("a"));
        assert_eq!(
            alpha_rename(&mut exp),
            Err(CompileError::NotInScope { name: "a".into() })
        );
    }

    #[test]
    fn deep_nesting_renames_iteratively() {
        let mut exp = Exp::var("x");
        for _ in 0..2_000 {
            exp = Exp::bop(Bop::Plus, Exp::int(1), exp);
        }
        let mut exp = Exp::app(Exp::lam("x", exp), Exp::int(0));
        alpha_rename(&mut exp).unwrap();
    }
}
