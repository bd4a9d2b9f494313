//! Step-function and fixpoint-call synthesis.

use fixq_dsl::subst::rename_free;
use fixq_dsl::{BinOp, Expr, Name, NameGen, Pat, Query, Scan, Step};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{InvertConfig, JoinSource};
use crate::extract::{CaseComponents, StepCase, StepClause};
use crate::generator::{tuple_pat, Cardinality, Generator};

/// Build `<iterate> base (fn (old, new) => step)`.
///
/// The step function evaluates every step case against the previous round's
/// increment (`new`) and concatenates the results. The overload is chosen by
/// the base relation's collection kind.
pub fn synthesize(parts: &CaseComponents, config: &InvertConfig, names: &mut NameGen) -> Generator {
    let goal_pat = tuple_pat(&parts.goals);
    let goal_expr = Expr::tuple(parts.goals.iter().map(Expr::var).collect());
    let base = &parts.base.generator;

    let projected = base.pat != goal_pat || !parts.base.residual.is_empty();
    let base_relation = if projected {
        let mut steps = Vec::new();
        if !parts.base.residual.is_empty() {
            steps.push(Step::Where(Expr::conjunction(parts.base.residual.clone())));
        }
        steps.push(Step::Yield(goal_expr.clone()));
        Expr::From(Box::new(Query {
            scans: vec![base.scan()],
            steps,
        }))
    } else {
        base.source.clone()
    };

    let old = names.claim("old");
    let new = names.claim("new");
    let accumulated = match config.join_source {
        JoinSource::Accumulated if !projected => Some(&base.source),
        _ => None,
    };

    let bodies: Vec<Expr> = parts
        .steps
        .iter()
        .map(|case| {
            let accumulated = accumulated.filter(|_| composes_paths(case, &parts.goals));
            step_body(case, &goal_expr, &old, &new, accumulated, names)
        })
        .collect();
    let step = bodies
        .into_iter()
        .rev()
        .reduce(|rest, body| Expr::binary(BinOp::Append, body, rest))
        .unwrap_or_else(|| Expr::List(Vec::new()));
    let step_fn = Expr::lambda(Pat::Tuple(vec![Pat::Var(old), Pat::Var(new)]), step);

    Generator {
        pat: goal_pat,
        source: Expr::apply(
            Expr::apply(Expr::var(base.kind.iterate_builtin()), base_relation),
            step_fn,
        ),
        kind: base.kind,
        cardinality: Cardinality::Finite,
    }
}

/// Whether `case` is a bare edge-then-path (or path-then-edge) composition
/// over the goal pair, so that scanning the accumulated relation in place of
/// the edge scan only adds rows the predicate already derives.
fn composes_paths(case: &StepCase, goals: &[Name]) -> bool {
    let [from, to] = goals else {
        return false;
    };
    let pair = |pat: &Pat| -> Option<(Name, Name)> {
        match pat {
            Pat::Tuple(items) => match items.as_slice() {
                [Pat::Var(a), Pat::Var(b)] if a != b => Some((a.clone(), b.clone())),
                _ => None,
            },
            _ => None,
        }
    };
    let (edge, path) = match case.clauses.as_slice() {
        [StepClause::Scan { generator, residual }, StepClause::Recursive { arg, .. }]
        | [StepClause::Recursive { arg, .. }, StepClause::Scan { generator, residual }]
            if residual.is_empty() =>
        {
            match (pair(&generator.pat), pair(arg)) {
                (Some(edge), Some(path)) => (edge, path),
                _ => return false,
            }
        }
        _ => return false,
    };
    let hop = |first: &(Name, Name), second: &(Name, Name)| {
        first.0 == *from && second.1 == *to && first.1 == second.0 && !goals.contains(&first.1)
    };
    hop(&edge, &path) || hop(&path, &edge)
}

fn step_body(
    case: &StepCase,
    goal: &Expr,
    old: &str,
    new: &str,
    accumulated: Option<&Expr>,
    names: &mut NameGen,
) -> Expr {
    let mut scope: BTreeSet<Name> = BTreeSet::new();
    let mut scans = Vec::new();
    let mut filters = Vec::new();

    for clause in &case.clauses {
        match clause {
            StepClause::Scan { generator, residual } => {
                let (pat, renames) = rename_clashes(&generator.pat, &scope, names, &mut filters);
                let source = match accumulated {
                    Some(base) if *base == generator.source => Expr::var(old),
                    _ => generator.source.clone(),
                };
                scope.extend(pat.vars());
                scans.push(Scan {
                    pat,
                    source: Some(source),
                });
                for r in residual {
                    filters.push(rename_free(r, &renames, names));
                }
            }
            StepClause::Filter(cond) => filters.push(cond.clone()),
            StepClause::Recursive { arg, .. } => {
                let (pat, _) = rename_clashes(arg, &scope, names, &mut filters);
                scope.extend(pat.vars());
                scans.push(Scan {
                    pat,
                    source: Some(Expr::var(new)),
                });
            }
        }
    }

    let mut steps = Vec::new();
    if !filters.is_empty() {
        steps.push(Step::Where(Expr::conjunction(filters)));
    }
    steps.push(Step::Yield(goal.clone()));
    Expr::From(Box::new(Query { scans, steps }))
}

/// Rename pattern variables already in scope, recording `v = v'` filters.
fn rename_clashes(
    pat: &Pat,
    scope: &BTreeSet<Name>,
    names: &mut NameGen,
    filters: &mut Vec<Expr>,
) -> (Pat, BTreeMap<Name, Name>) {
    let mut renames = BTreeMap::new();
    for v in pat.vars() {
        if scope.contains(&v) {
            let fresh = names.fresh(&v);
            filters.push(Expr::equals(Expr::var(v.as_str()), Expr::var(fresh.as_str())));
            renames.insert(v, fresh);
        }
    }
    if renames.is_empty() {
        return (pat.clone(), renames);
    }
    (pat.rename(&|v| renames.get(v).cloned()), renames)
}
