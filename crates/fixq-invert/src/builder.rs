//! Builds the analysis tree of a predicate body.

use fixq_dsl::subst::rename_free;
use fixq_dsl::{BinOp, Expr, Name, NameGen, Query, Step};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use crate::base::BaseInverter;
use crate::binding::{is_builtin, BindingLookup};
use crate::environment::{ActiveFunctions, Environment};
use crate::generator::{CollectionKind, Cardinality, Generator};
use crate::tree::{Inversion, Node, Terminal, TerminalKind};

/// State shared by the builder and base inversion for one top-level call.
pub struct InvertContext<'a> {
    pub lookup: &'a dyn BindingLookup,
    pub names: &'a mut NameGen,
}

impl InvertContext<'_> {
    /// A name that refers to a declaration or builtin rather than a variable.
    pub fn is_global(&self, name: &str, env: &Environment) -> bool {
        !env.is_goal(name)
            && !env.is_bound(name)
            && (is_builtin(name) || self.lookup.lookup(name).is_some())
    }

    pub fn local_vars(&self, expr: &Expr, env: &Environment) -> BTreeSet<Name> {
        expr.free_vars()
            .into_iter()
            .filter(|v| !self.is_global(v, env))
            .collect()
    }
}

pub struct TreeBuilder<'a> {
    inverter: &'a dyn BaseInverter,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(inverter: &'a dyn BaseInverter) -> Self {
        Self { inverter }
    }

    pub fn build(
        &self,
        expr: &Expr,
        env: &Environment,
        active: &ActiveFunctions,
        cx: &mut InvertContext<'_>,
    ) -> Node {
        let arms = expr.disjuncts();
        if let [first, second, rest @ ..] = arms.as_slice() {
            let left = self.build(first, env, active, cx);
            let remainder = rest
                .iter()
                .fold((*second).clone(), |acc, arm| Expr::or_else(acc, (*arm).clone()));
            let right = self.build(&remainder, env, active, cx);
            trace!(arms = arms.len(), "disjunction");
            return Node::Branch {
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        let clauses = flatten_clauses(expr, env, cx);
        match clauses.as_slice() {
            [single] if single != expr => self.build(single, env, active, cx),
            [_] | [] => self.build_leaf(expr, env, active, cx),
            _ => self.build_sequence(&clauses, env, active, cx),
        }
    }

    fn build_sequence(
        &self,
        clauses: &[Expr],
        env: &Environment,
        active: &ActiveFunctions,
        cx: &mut InvertContext<'_>,
    ) -> Node {
        let joins = join_vars(clauses, env, cx);
        trace!(clauses = clauses.len(), joins = ?joins, "conjunction");

        let mut current = env.with_join_vars(&joins);
        let mut children = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let node = self.build(clause, &current, active, cx);
            current = extend_with(&current, &node);
            children.push(node);
        }
        Node::Sequence { children, joins }
    }

    fn build_leaf(
        &self,
        expr: &Expr,
        env: &Environment,
        active: &ActiveFunctions,
        cx: &mut InvertContext<'_>,
    ) -> Node {
        if let Some((function, arg)) = expr.as_named_call() {
            if active.contains(function) && !env.is_bound(function) && !env.is_goal(function) {
                trace!(function, "recursive call");
                return Node::Terminal(Terminal {
                    term: expr.clone(),
                    kind: TerminalKind::Recursive {
                        function: function.to_string(),
                        arg: arg.clone(),
                    },
                });
            }
        }
        let inversion = self.inverter.invert(expr, env, active, cx);
        Node::Terminal(Terminal {
            term: expr.clone(),
            kind: TerminalKind::Inverted(inversion),
        })
    }
}

/// Variables free in two or more clauses that are not goals.
fn join_vars(clauses: &[Expr], env: &Environment, cx: &InvertContext<'_>) -> BTreeSet<Name> {
    let mut counts: BTreeMap<Name, usize> = BTreeMap::new();
    for clause in clauses {
        for v in cx.local_vars(clause, env) {
            *counts.entry(v).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(v, n)| *n >= 2 && !env.is_goal(v))
        .map(|(v, _)| v)
        .collect()
}

/// The environment after `node` has produced its bindings.
fn extend_with(env: &Environment, node: &Node) -> Environment {
    match node {
        Node::Terminal(Terminal {
            kind: TerminalKind::Inverted(Inversion::Generated { generator, .. }),
            ..
        }) => env.with_generator(generator),
        // The recursive relation is the fixpoint being computed, so it is
        // finite whenever the whole predicate is.
        Node::Terminal(Terminal {
            kind: TerminalKind::Recursive { function, arg },
            ..
        }) => match arg.to_pat() {
            Some(pat) => env.with_generator(&Generator {
                pat,
                source: Expr::var(function.as_str()),
                kind: CollectionKind::List,
                cardinality: Cardinality::Finite,
            }),
            None => env.clone(),
        },
        Node::Sequence { children, .. } => children.iter().fold(env.clone(), |e, c| extend_with(&e, c)),
        Node::Terminal(_) | Node::Branch { .. } => env.clone(),
    }
}

/// Conjuncts of `expr` in order, with `exists` filters spliced in.
pub fn flatten_clauses(expr: &Expr, env: &Environment, cx: &mut InvertContext<'_>) -> Vec<Expr> {
    let mut taken = expr.free_vars();
    let mut out = Vec::new();
    flatten_into(expr, env, &mut taken, cx, &mut out);
    out
}

fn flatten_into(
    expr: &Expr,
    env: &Environment,
    taken: &mut BTreeSet<Name>,
    cx: &mut InvertContext<'_>,
    out: &mut Vec<Expr>,
) {
    for conjunct in expr.conjuncts() {
        let unwrapped = match conjunct {
            Expr::Exists(q) => unwrap_exists(q, env, taken, cx),
            _ => None,
        };
        match unwrapped {
            Some(clauses) => {
                for clause in &clauses {
                    flatten_into(clause, env, taken, cx, out);
                }
            }
            None => out.push(conjunct.clone()),
        }
    }
}

/// The filter clauses of `exists <scans> where <conds>`.
///
/// Sourced scans become `pat elem source` clauses, followed by every `where`
/// condition. Existential variables that collide with a goal, a bound
/// variable, a declaration or a name in `taken` are renamed, and the names
/// they end up with are added to `taken`, so sibling `exists` blocks never
/// share a variable. Returns `None` for comprehensions with a `yield` or
/// without a `where`.
pub fn unwrap_exists(
    query: &Query,
    env: &Environment,
    taken: &mut BTreeSet<Name>,
    cx: &mut InvertContext<'_>,
) -> Option<Vec<Expr>> {
    if query.has_yield() || !query.has_where() {
        return None;
    }
    let mut clauses = Vec::new();
    for scan in &query.scans {
        if let Some(source) = &scan.source {
            clauses.push(Expr::binary(BinOp::Elem, scan.pat.to_expr()?, source.clone()));
        }
    }
    clauses.extend(query.steps.iter().filter_map(|step| match step {
        Step::Where(cond) => Some(cond.clone()),
        Step::Yield(_) => None,
    }));

    let mut renames: BTreeMap<Name, Name> = BTreeMap::new();
    for v in query.scan_vars() {
        let clash = env.is_goal(&v)
            || env.is_bound(&v)
            || taken.contains(&v)
            || is_builtin(&v)
            || cx.lookup.lookup(&v).is_some();
        let name = if clash {
            let fresh = cx.names.fresh(&v);
            renames.insert(v, fresh.clone());
            fresh
        } else {
            v
        };
        taken.insert(name);
    }
    if renames.is_empty() {
        return Some(clauses);
    }
    Some(
        clauses
            .iter()
            .map(|c| rename_free(c, &renames, cx.names))
            .collect(),
    )
}

/// Variables of `expr` contained in `keep`, in order of first appearance.
pub fn appearance_order(expr: &Expr, keep: &BTreeSet<Name>) -> Vec<Name> {
    fn walk(expr: &Expr, keep: &BTreeSet<Name>, out: &mut Vec<Name>) {
        match expr {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                if keep.contains(name) && !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Tuple(items) | Expr::List(items) => items.iter().for_each(|e| walk(e, keep, out)),
            Expr::Apply { func, arg } => {
                walk(func, keep, out);
                walk(arg, keep, out);
            }
            Expr::Fn { body, .. } => walk(body, keep, out),
            Expr::AndAlso(l, r) | Expr::OrElse(l, r) => {
                walk(l, keep, out);
                walk(r, keep, out);
            }
            Expr::Binary { left, right, .. } => {
                walk(left, keep, out);
                walk(right, keep, out);
            }
            Expr::From(q) | Expr::Exists(q) => {
                for scan in &q.scans {
                    if let Some(source) = &scan.source {
                        walk(source, keep, out);
                    }
                }
                for step in &q.steps {
                    match step {
                        Step::Where(e) | Step::Yield(e) => walk(e, keep, out),
                    }
                }
            }
        }
    }
    let mut out = Vec::new();
    walk(expr, keep, &mut out);
    // Anything only reachable through a binder position comes last.
    for name in keep {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    out
}
