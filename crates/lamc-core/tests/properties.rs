//! Property tests over generated closed terms.
//!
//! The generator builds well-scoped surface expressions: variables are only
//! drawn from parameters of enclosing lambdas, so alpha-rename must always
//! succeed. Application heads are unrestricted, so conversion is allowed to
//! reject a term whose head reduces to an integer; properties downstream of
//! conversion skip those.

use std::collections::HashSet;

use proptest::prelude::*;
use proptest::strategy::Union;

use lamc_core::anf;
use lamc_core::ast::{Bop, Exp as Ast};
use lamc_core::closure::{closure_convert, free_vars};
use lamc_core::hoist::{hoist, Function};
use lamc_core::normalize::{convert, convert_defunc};
use lamc_core::rename::alpha_rename;

fn arb_exp(depth: u32, scope: Vec<String>) -> BoxedStrategy<Ast> {
    let mut leaves: Vec<BoxedStrategy<Ast>> = vec![(-50i64..50).prop_map(Ast::int).boxed()];
    if !scope.is_empty() {
        let names = scope.clone();
        leaves.push(
            (0..names.len())
                .prop_map(move |i| Ast::var(names[i].clone()))
                .boxed(),
        );
    }
    let leaf = Union::new(leaves).boxed();
    if depth == 0 {
        return leaf;
    }

    let sub = arb_exp(depth - 1, scope.clone());
    let arb_op = prop_oneof![Just(Bop::Plus), Just(Bop::Minus), Just(Bop::Times)];
    let mut branches: Vec<BoxedStrategy<Ast>> = vec![
        leaf,
        (arb_op, sub.clone(), sub.clone())
            .prop_map(|(op, lhs, rhs)| Ast::bop(op, lhs, rhs))
            .boxed(),
        (sub.clone(), sub.clone(), sub.clone())
            .prop_map(|(cond, then, els)| Ast::if_(cond, then, els))
            .boxed(),
        (sub.clone(), sub)
            .prop_map(|(func, arg)| Ast::app(func, arg))
            .boxed(),
    ];
    for param in ["a", "b", "x"] {
        let mut inner = scope.clone();
        inner.push(param.to_string());
        branches.push(
            arb_exp(depth - 1, inner)
                .prop_map(move |body| Ast::lam(param, body))
                .boxed(),
        );
    }
    Union::new(branches).boxed()
}

fn ast_binders_unique(exp: &Ast, seen: &mut HashSet<String>) -> bool {
    match exp {
        Ast::Int(_) | Ast::Var(_) => true,
        Ast::Lam { param, body } => seen.insert(param.clone()) && ast_binders_unique(body, seen),
        Ast::App { func, arg } => {
            ast_binders_unique(func, seen) && ast_binders_unique(arg, seen)
        }
        Ast::Bop { lhs, rhs, .. } => {
            ast_binders_unique(lhs, seen) && ast_binders_unique(rhs, seen)
        }
        Ast::If { cond, then, els } => {
            ast_binders_unique(cond, seen)
                && ast_binders_unique(then, seen)
                && ast_binders_unique(els, seen)
        }
    }
}

fn ast_scope_sound(exp: &Ast, scope: &mut Vec<String>) -> bool {
    match exp {
        Ast::Int(_) => true,
        Ast::Var(name) => scope.iter().any(|bound| bound == name),
        Ast::Lam { param, body } => {
            scope.push(param.clone());
            let sound = ast_scope_sound(body, scope);
            scope.pop();
            sound
        }
        Ast::App { func, arg } => ast_scope_sound(func, scope) && ast_scope_sound(arg, scope),
        Ast::Bop { lhs, rhs, .. } => ast_scope_sound(lhs, scope) && ast_scope_sound(rhs, scope),
        Ast::If { cond, then, els } => {
            ast_scope_sound(cond, scope)
                && ast_scope_sound(then, scope)
                && ast_scope_sound(els, scope)
        }
    }
}

/// Structural equality up to binder and variable names.
fn same_shape(lhs: &Ast, rhs: &Ast) -> bool {
    match (lhs, rhs) {
        (Ast::Int(a), Ast::Int(b)) => a == b,
        (Ast::Var(_), Ast::Var(_)) => true,
        (Ast::Lam { body: a, .. }, Ast::Lam { body: b, .. }) => same_shape(a, b),
        (
            Ast::App { func: f1, arg: a1 },
            Ast::App { func: f2, arg: a2 },
        ) => same_shape(f1, f2) && same_shape(a1, a2),
        (
            Ast::Bop { op: o1, lhs: l1, rhs: r1 },
            Ast::Bop { op: o2, lhs: l2, rhs: r2 },
        ) => o1 == o2 && same_shape(l1, l2) && same_shape(r1, r2),
        (
            Ast::If { cond: c1, then: t1, els: e1 },
            Ast::If { cond: c2, then: t2, els: e2 },
        ) => same_shape(c1, c2) && same_shape(t1, t2) && same_shape(e1, e2),
        _ => false,
    }
}

fn anf_binders_unique(exp: &anf::Exp, seen: &mut HashSet<String>) -> bool {
    match exp {
        anf::Exp::Halt { .. } | anf::Exp::Jump { .. } => true,
        anf::Exp::Fun {
            name,
            params,
            body,
            rest,
        } => {
            seen.insert(name.clone())
                && params.iter().all(|p| seen.insert(p.clone()))
                && anf_binders_unique(body, seen)
                && anf_binders_unique(rest, seen)
        }
        anf::Exp::Join {
            name,
            slot,
            body,
            rest,
        } => {
            seen.insert(name.clone())
                && slot.iter().all(|s| seen.insert(s.clone()))
                && anf_binders_unique(body, seen)
                && anf_binders_unique(rest, seen)
        }
        anf::Exp::App { name, rest, .. }
        | anf::Exp::Bop { name, rest, .. }
        | anf::Exp::Tuple { name, rest, .. }
        | anf::Exp::Proj { name, rest, .. } => {
            seen.insert(name.clone()) && anf_binders_unique(rest, seen)
        }
        anf::Exp::If { then, els, .. } => {
            anf_binders_unique(then, seen) && anf_binders_unique(els, seen)
        }
    }
}

/// No `Fun`/`Join` nodes, `If` arms are jumps, jump targets resolve.
fn block_body_is_flat(exp: &anf::Exp, labels: &HashSet<&str>) -> bool {
    match exp {
        anf::Exp::Halt { .. } => true,
        anf::Exp::Jump { join_name, .. } => labels.contains(join_name.as_str()),
        anf::Exp::Fun { .. } | anf::Exp::Join { .. } => false,
        anf::Exp::App { rest, .. }
        | anf::Exp::Bop { rest, .. }
        | anf::Exp::Tuple { rest, .. }
        | anf::Exp::Proj { rest, .. } => block_body_is_flat(rest, labels),
        anf::Exp::If { then, els, .. } => {
            matches!(then.as_ref(), anf::Exp::Jump { join_name, .. } if labels.contains(join_name.as_str()))
                && matches!(els.as_ref(), anf::Exp::Jump { join_name, .. } if labels.contains(join_name.as_str()))
        }
    }
}

fn hoisted_invariants_hold(functions: &[Function]) -> bool {
    let mut function_names = HashSet::new();
    if !functions.iter().all(|f| function_names.insert(f.name.as_str())) {
        return false;
    }
    functions.iter().all(|function| {
        let mut labels: HashSet<&str> = HashSet::new();
        if !function.blocks.iter().all(|b| labels.insert(b.name.as_str())) {
            return false;
        }
        block_body_is_flat(&function.entry.body, &labels)
            && function
                .blocks
                .iter()
                .all(|block| block_body_is_flat(&block.body, &labels))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rename_succeeds_and_produces_unique_sound_scopes(exp in arb_exp(4, vec![])) {
        let mut exp = exp;
        alpha_rename(&mut exp).unwrap();
        prop_assert!(ast_binders_unique(&exp, &mut HashSet::new()));
        prop_assert!(ast_scope_sound(&exp, &mut Vec::new()));
    }

    #[test]
    fn rename_twice_preserves_structure(exp in arb_exp(4, vec![])) {
        let mut once = exp;
        alpha_rename(&mut once).unwrap();
        let mut twice = once.clone();
        alpha_rename(&mut twice).unwrap();
        prop_assert!(same_shape(&once, &twice));
    }

    #[test]
    fn direct_and_defunctionalized_conversion_agree(exp in arb_exp(4, vec![])) {
        let mut exp = exp;
        alpha_rename(&mut exp).unwrap();
        let direct = convert(exp.clone()).map(|e| e.to_string());
        let defunc = convert_defunc(exp).map(|e| e.to_string());
        prop_assert_eq!(direct, defunc);
    }

    #[test]
    fn conversion_binders_are_globally_unique(exp in arb_exp(4, vec![])) {
        let mut exp = exp;
        alpha_rename(&mut exp).unwrap();
        if let Ok(anf) = convert_defunc(exp) {
            prop_assert!(anf_binders_unique(&anf, &mut HashSet::new()));
        }
    }

    #[test]
    fn closure_conversion_closes_the_program(exp in arb_exp(4, vec![])) {
        let mut exp = exp;
        alpha_rename(&mut exp).unwrap();
        if let Ok(anf) = convert_defunc(exp) {
            let converted = closure_convert(anf);
            prop_assert!(free_vars(&converted).is_empty());
        }
    }

    #[test]
    fn hoisting_flattens_every_accepted_program(exp in arb_exp(4, vec![])) {
        let mut exp = exp;
        alpha_rename(&mut exp).unwrap();
        if let Ok(anf) = convert_defunc(exp) {
            let functions = hoist(closure_convert(anf));
            prop_assert!(!functions.is_empty());
            prop_assert_eq!(functions.last().unwrap().name.as_str(), "main");
            prop_assert!(hoisted_invariants_hold(&functions));
        }
    }
}
