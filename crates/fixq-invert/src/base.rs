//! Base inversion: single non-recursive clauses to generators.

use fixq_dsl::subst::substitute;
use fixq_dsl::{BinOp, Expr, Name, Pat};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use crate::binding::Binding;
use crate::builder::{appearance_order, flatten_clauses, InvertContext};
use crate::environment::{ActiveFunctions, Environment};
use crate::generator::{source_shape, Generator};
use crate::tree::Inversion;

/// Turns one boolean clause into a generator of the variables it constrains.
pub trait BaseInverter {
    fn invert(
        &self,
        term: &Expr,
        env: &Environment,
        active: &ActiveFunctions,
        cx: &mut InvertContext<'_>,
    ) -> Inversion;
}

/// Default base inversion.
///
/// Handles membership (`pat elem coll`), equality with a computable value
/// (`x = e`), conjunctions and `exists` filters of those, and calls to
/// non-recursive helper predicates, whose bodies are unfolded. Calls to
/// predicates whose definitions are not visible yield an infinite generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElemInverter;

impl BaseInverter for ElemInverter {
    fn invert(
        &self,
        term: &Expr,
        env: &Environment,
        active: &ActiveFunctions,
        cx: &mut InvertContext<'_>,
    ) -> Inversion {
        let locals = cx.local_vars(term, env);
        if locals.iter().all(|v| env.is_bound(v)) {
            return Inversion::Filter;
        }
        match term {
            Expr::Binary {
                op: BinOp::Elem,
                left,
                right,
            } => invert_elem(left, right, env, cx),
            Expr::Binary {
                op: BinOp::Eq,
                left,
                right,
            } => invert_eq(left, right, env, cx)
                .or_else(|| invert_eq(right, left, env, cx))
                .unwrap_or_else(|| Inversion::failed(format!("neither side of `{term}` is computable"))),
            Expr::AndAlso(..) | Expr::Exists(_) => {
                let outputs = unbound_in_order(term, &locals, env);
                self.invert_body(term, &outputs, env, active, cx)
            }
            _ => match term.as_named_call() {
                Some((function, arg)) => self.invert_call(term, function, arg, &locals, env, active, cx),
                None => Inversion::failed(format!("cannot invert `{term}`")),
            },
        }
    }
}

impl ElemInverter {
    #[allow(clippy::too_many_arguments)]
    fn invert_call(
        &self,
        term: &Expr,
        function: &str,
        arg: &Expr,
        locals: &BTreeSet<Name>,
        env: &Environment,
        active: &ActiveFunctions,
        cx: &mut InvertContext<'_>,
    ) -> Inversion {
        if env.is_bound(function) || env.is_goal(function) {
            return Inversion::failed(format!("`{function}` is called through a variable"));
        }
        match cx.lookup.lookup(function) {
            Some(Binding::Function { .. }) if active.contains(function) => {
                Inversion::failed(format!("`{function}` recurses outside the recursive arm"))
            }
            Some(Binding::Function { param, body }) => {
                let Some(map) = bind_param(&param, arg) else {
                    return Inversion::failed(format!("argument of `{term}` does not fit `{param}`"));
                };
                trace!(function, "unfolding helper");
                let body = substitute(&body, &map, cx.names);
                let outputs = unbound_in_order(term, locals, env);
                self.invert_body(&body, &outputs, env, &active.with(function), cx)
            }
            // Runtime-only or unknown predicates: scan the extent and filter.
            Some(Binding::Value { .. }) | None => match arg.to_pat() {
                Some(pat) => {
                    let (pat, residual) = freshen(&pat, env, cx);
                    match pat.to_expr() {
                        Some(row) => Inversion::Generated {
                            generator: Generator::extent(pat, Expr::apply(Expr::var(function), row)),
                            residual,
                        },
                        None => Inversion::failed(format!("cannot enumerate `{term}`")),
                    }
                }
                None => Inversion::failed(format!("argument of `{term}` is not a pattern")),
            },
        }
    }

    /// Invert a helper body (or a conjunction) so that it produces `outputs`.
    fn invert_body(
        &self,
        body: &Expr,
        outputs: &[Name],
        env: &Environment,
        active: &ActiveFunctions,
        cx: &mut InvertContext<'_>,
    ) -> Inversion {
        if body.disjuncts().len() > 1 {
            return Inversion::failed(format!("disjunctive helper body `{body}`"));
        }
        let clauses = flatten_clauses(body, env, cx);
        match clauses.as_slice() {
            [single] if single == body && matches!(body, Expr::AndAlso(..) | Expr::Exists(_)) => {
                Inversion::failed(format!("cannot invert `{body}`"))
            }
            [single] => self.invert(single, env, active, cx),
            _ => self.invert_clauses(&clauses, outputs, env, active, cx),
        }
    }

    /// Invert clauses left to right, joining their generators.
    fn invert_clauses(
        &self,
        clauses: &[Expr],
        outputs: &[Name],
        env: &Environment,
        active: &ActiveFunctions,
        cx: &mut InvertContext<'_>,
    ) -> Inversion {
        let mut current = env.clone();
        let mut parts: Vec<Generator> = Vec::new();
        let mut residual: Vec<Expr> = Vec::new();
        for clause in clauses {
            match self.invert(clause, &current, active, cx) {
                Inversion::Generated {
                    generator,
                    residual: extra,
                } => {
                    current = current.with_generator(&generator);
                    parts.push(generator);
                    residual.extend(extra);
                }
                Inversion::Filter => residual.push(clause.clone()),
                failed @ Inversion::Failed { .. } => return failed,
            }
        }
        if let Some(missing) = outputs.iter().find(|v| !current.is_bound(v)) {
            return Inversion::failed(format!("nothing binds `{missing}`"));
        }
        match parts.as_slice() {
            [] => Inversion::Filter,
            [only] if only.pat.vars() == outputs => Inversion::Generated {
                generator: only.clone(),
                residual,
            },
            _ => Inversion::Generated {
                generator: Generator::join(&parts, residual, outputs),
                residual: Vec::new(),
            },
        }
    }
}

/// `pat elem source`: scan the source.
fn invert_elem(left: &Expr, right: &Expr, env: &Environment, cx: &mut InvertContext<'_>) -> Inversion {
    if let Some(v) = cx.local_vars(right, env).into_iter().find(|v| !env.is_bound(v)) {
        return Inversion::failed(format!("source `{right}` depends on unbound `{v}`"));
    }
    let Some(pat) = left.to_pat() else {
        return Inversion::failed(format!("`{left}` is not a pattern"));
    };
    let (pat, residual) = freshen(&pat, env, cx);
    let (kind, cardinality) = source_shape(right, cx.lookup);
    Inversion::Generated {
        generator: Generator {
            pat,
            source: right.clone(),
            kind,
            cardinality,
        },
        residual,
    }
}

/// `pat = value` where `value` only uses bound variables.
fn invert_eq(pat_side: &Expr, value: &Expr, env: &Environment, cx: &mut InvertContext<'_>) -> Option<Inversion> {
    if cx.local_vars(value, env).iter().any(|v| !env.is_bound(v)) {
        return None;
    }
    let pat = pat_side.to_pat()?;
    if pat.vars().iter().all(|v| env.is_bound(v)) {
        return None;
    }
    let (pat, residual) = freshen(&pat, env, cx);
    Some(Inversion::Generated {
        generator: Generator::singleton(pat, value.clone()),
        residual,
    })
}

/// Replace pattern variables that are already bound (or repeated) with fresh
/// ones, returning the equalities that restore the constraint.
fn freshen(pat: &Pat, env: &Environment, cx: &mut InvertContext<'_>) -> (Pat, Vec<Expr>) {
    fn go(
        pat: &Pat,
        env: &Environment,
        cx: &mut InvertContext<'_>,
        seen: &mut BTreeSet<Name>,
        residual: &mut Vec<Expr>,
    ) -> Pat {
        match pat {
            Pat::Var(v) if env.is_bound(v) || seen.contains(v) => {
                let fresh = cx.names.fresh(v);
                residual.push(Expr::equals(Expr::var(fresh.as_str()), Expr::var(v.as_str())));
                Pat::Var(fresh)
            }
            Pat::Var(v) => {
                seen.insert(v.clone());
                pat.clone()
            }
            Pat::Tuple(items) => Pat::Tuple(items.iter().map(|p| go(p, env, cx, seen, residual)).collect()),
            Pat::Wildcard | Pat::Literal(_) => pat.clone(),
        }
    }
    let mut residual = Vec::new();
    let pat = go(pat, env, cx, &mut BTreeSet::new(), &mut residual);
    (pat, residual)
}

/// Map a parameter pattern onto an argument expression.
pub fn bind_param(param: &Pat, arg: &Expr) -> Option<BTreeMap<Name, Expr>> {
    let mut map = BTreeMap::new();
    fn go(param: &Pat, arg: &Expr, map: &mut BTreeMap<Name, Expr>) -> bool {
        match (param, arg) {
            (Pat::Wildcard, _) => true,
            (Pat::Var(v), _) => map.insert(v.clone(), arg.clone()).is_none(),
            (Pat::Tuple(ps), Expr::Tuple(items)) if ps.len() == items.len() => {
                ps.iter().zip(items).all(|(p, a)| go(p, a, map))
            }
            _ => false,
        }
    }
    go(param, arg, &mut map).then_some(map)
}

fn unbound_in_order(term: &Expr, locals: &BTreeSet<Name>, env: &Environment) -> Vec<Name> {
    let unbound: BTreeSet<Name> = locals.iter().filter(|v| !env.is_bound(v)).cloned().collect();
    appearance_order(term, &unbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Cardinality;
    use fixq_dsl::{parse_expr, parse_program, NameGen, Program};

    fn invert_in(program: &Program, term: &str, env: &Environment) -> Inversion {
        let term = parse_expr(term).expect("term parses");
        let mut names = NameGen::with_reserved(term.all_names());
        let mut cx = InvertContext {
            lookup: program,
            names: &mut names,
        };
        ElemInverter.invert(&term, env, &ActiveFunctions::new().with("path"), &mut cx)
    }

    fn goals(xs: &[&str]) -> Environment {
        Environment::initial(&xs.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    fn generated(inv: Inversion) -> (Generator, Vec<Expr>) {
        match inv {
            Inversion::Generated { generator, residual } => (generator, residual),
            other => panic!("expected a generator, got {other:?}"),
        }
    }

    #[test]
    fn membership_scans_the_collection() {
        let program = parse_program("val edges = [(1, 2)];").expect("parses");
        let (gen, residual) = generated(invert_in(&program, "(x, y) elem edges", &goals(&["x", "y"])));
        assert_eq!(gen.pat.to_string(), "(x, y)");
        assert_eq!(gen.source.to_string(), "edges");
        assert!(gen.is_finite());
        assert!(residual.is_empty());
    }

    #[test]
    fn bound_components_become_fresh_variables_with_residuals() {
        let program = parse_program("val edges = [(1, 2)];").expect("parses");
        let env = goals(&["y"]).with_generator(&Generator::singleton(Pat::var("z"), Expr::int(1)));
        let (gen, residual) = generated(invert_in(&program, "(z, y) elem edges", &env));
        assert_eq!(gen.pat.to_string(), "(z_1, y)");
        assert_eq!(residual.iter().map(|e| e.to_string()).collect::<Vec<_>>(), vec!["z_1 = z"]);
    }

    #[test]
    fn helper_predicates_are_unfolded() {
        let program = parse_program(
            "val edges = [(1, 2)]; fun edge (a, b) = (a, b) elem edges;",
        )
        .expect("parses");
        let (gen, _) = generated(invert_in(&program, "edge (x, z)", &goals(&["x"])));
        assert_eq!(gen.pat.to_string(), "(x, z)");
        assert_eq!(gen.source.to_string(), "edges");
    }

    #[test]
    fn conjunctive_helpers_join_their_generators() {
        let program = parse_program(
            "val e = [(1, 2)]; val f = [(2, 3)];
             fun two (a, c) = exists b where (a, b) elem e andalso (b, c) elem f;",
        )
        .expect("parses");
        let (gen, residual) = generated(invert_in(&program, "two (x, y)", &goals(&["x", "y"])));
        assert!(residual.is_empty());
        assert_eq!(gen.pat.to_string(), "(x, y)");
        assert_eq!(
            gen.source.to_string(),
            "from (x, b) in e, (b_1, y) in f where b_1 = b yield (x, y)"
        );
        assert!(gen.is_finite());
    }

    #[test]
    fn equality_with_a_bound_value_is_a_singleton() {
        let program = Program::default();
        let env = goals(&["y"]).with_generator(&Generator::singleton(Pat::var("x"), Expr::int(1)));
        let (gen, _) = generated(invert_in(&program, "x + 1 = y", &env));
        assert_eq!(gen.pat.to_string(), "y");
        assert_eq!(gen.source.to_string(), "[x + 1]");
    }

    #[test]
    fn fully_bound_clauses_are_filters() {
        let program = Program::default();
        let env = Environment::default().with_generator(&Generator::singleton(
            Pat::Tuple(vec![Pat::var("x"), Pat::var("y")]),
            Expr::Tuple(vec![Expr::int(1), Expr::int(2)]),
        ));
        assert_eq!(invert_in(&program, "x < y", &env), Inversion::Filter);
    }

    #[test]
    fn opaque_predicates_are_infinite() {
        let program = parse_program("val edge : (int * int) list;").expect("parses");
        let (gen, _) = generated(invert_in(&program, "mystery (x, y)", &goals(&["x", "y"])));
        assert_eq!(gen.cardinality, Cardinality::Infinite);
        assert_eq!(gen.source.to_string(), "from (x, y) where mystery (x, y)");
    }

    #[test]
    fn comparisons_on_unbound_variables_fail() {
        let inv = invert_in(&Program::default(), "x < y", &goals(&["x", "y"]));
        assert!(matches!(inv, Inversion::Failed { .. }));
    }

    #[test]
    fn parameters_bind_componentwise() {
        let param = fixq_dsl::parse_pat("(a, (b, _))").expect("parses");
        let arg = parse_expr("(x, (1, y))").expect("parses");
        let map = bind_param(&param, &arg).expect("fits");
        assert_eq!(map.get("a"), Some(&Expr::var("x")));
        assert_eq!(map.get("b"), Some(&Expr::int(1)));
        assert!(bind_param(&param, &Expr::var("p")).is_none());
    }
}
