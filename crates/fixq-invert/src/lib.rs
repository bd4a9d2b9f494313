//! Predicate inversion for fixq queries
//!
//! Rewrites a query that filters an unbounded scan through a recursive
//! predicate,
//!
//! ```text
//! from p where path p
//! ```
//!
//! into a scan over a bounded fixpoint computation,
//!
//! ```text
//! from p in List.iterate edges (fn (old, new) => ...)
//! ```
//!
//! when the predicate has the transitive-closure shape: a finite base case
//! `orelse` one or more linear recursive cases joined to a step relation.
//! When the shape is not recognised the pass returns [`NotInvertible`] and the
//! caller evaluates the original query by enumerate-and-filter.
//!
//! Stages:
//! - [`builder`]: analysis tree of the predicate body ([`tree`])
//! - [`extract`]: base and step cases
//! - [`synth`]: step function and fixpoint call
//!
//! Name lookup ([`BindingLookup`]) and single-clause inversion
//! ([`BaseInverter`]) are traits; [`fixq_dsl::Program`] and [`ElemInverter`]
//! are the defaults.

pub mod base;
pub mod binding;
pub mod builder;
pub mod config;
pub mod environment;
pub mod error;
pub mod extract;
pub mod generator;
pub mod synth;
pub mod tree;

pub use base::{BaseInverter, ElemInverter};
pub use binding::{Binding, BindingLookup};
pub use config::{DisjunctionPolicy, InvertConfig, JoinSource};
pub use environment::{ActiveFunctions, Environment};
pub use error::NotInvertible;
pub use generator::{Cardinality, CollectionKind, Generator};

use fixq_dsl::digest::expr_digest;
use fixq_dsl::subst::substitute;
use fixq_dsl::{Expr, Name, NameGen, Pat, Query, Scan, Step};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::binding::BUILTINS;
use crate::builder::{InvertContext, TreeBuilder};
use crate::generator::tuple_pat;

/// A successful inversion: scan `generator`, then keep rows satisfying
/// `residual`.
#[derive(Debug, Clone, PartialEq)]
pub struct Inverted {
    pub generator: Generator,
    pub residual: Vec<Expr>,
}

impl Inverted {
    pub fn scan(&self) -> Scan {
        self.generator.scan()
    }

    /// Stable digest of the emitted source expression.
    pub fn digest(&self) -> String {
        expr_digest(&self.generator.source)
    }
}

pub struct PredicateInverter<'a> {
    lookup: &'a dyn BindingLookup,
    base: Box<dyn BaseInverter + 'a>,
    config: InvertConfig,
}

impl<'a> PredicateInverter<'a> {
    pub fn new(lookup: &'a dyn BindingLookup) -> Self {
        Self::with_config(lookup, InvertConfig::default())
    }

    pub fn with_config(lookup: &'a dyn BindingLookup, config: InvertConfig) -> Self {
        Self {
            lookup,
            base: Box::new(ElemInverter),
            config,
        }
    }

    pub fn with_base_inverter(mut self, base: impl BaseInverter + 'a) -> Self {
        self.base = Box::new(base);
        self
    }

    pub fn config(&self) -> &InvertConfig {
        &self.config
    }

    /// Invert `call` (a predicate application) into a finite generator of
    /// `goals`. Variables in `bound` are already produced by the context.
    pub fn invert(
        &self,
        call: &Expr,
        goals: &[Name],
        bound: &BTreeMap<Name, Generator>,
    ) -> Result<Inverted, NotInvertible> {
        let result = self.try_invert(call, goals, bound);
        match &result {
            Ok(inverted) => debug!(call = %call, generator = %inverted.generator.source, "inverted"),
            Err(err) => debug!(call = %call, reason = %err, "not invertible"),
        }
        result
    }

    fn try_invert(
        &self,
        call: &Expr,
        goals: &[Name],
        bound: &BTreeMap<Name, Generator>,
    ) -> Result<Inverted, NotInvertible> {
        if !self.config.enabled {
            return Err(NotInvertible::no_match("disabled"));
        }
        let Some((predicate, arg)) = call.as_named_call() else {
            return Err(NotInvertible::no_match(format!("`{call}` is not a predicate call")));
        };
        let Some(Binding::Function { param, body }) = self.lookup.lookup(predicate) else {
            return Err(NotInvertible::UnresolvedBinding {
                name: predicate.to_string(),
            });
        };

        let mut names = NameGen::with_reserved(body.all_names());
        names.reserve_all(call.all_names());
        names.reserve_all(goals.iter().cloned());
        names.reserve_all(bound.keys().cloned());
        names.reserve_all(self.lookup.names());
        names.reserve_all(param.vars());
        names.reserve_all(BUILTINS.iter().copied());

        let shape = bind_call(&param, arg, goals, bound, &mut names)?;
        let body = substitute(&body, &shape.renames, &mut names);
        let env = Environment::initial_with_bindings(&shape.goals, bound);
        let active = ActiveFunctions::new().with(predicate);

        let tree = {
            let mut cx = InvertContext {
                lookup: self.lookup,
                names: &mut names,
            };
            TreeBuilder::new(self.base.as_ref()).build(&body, &env, &active, &mut cx)
        };
        let parts = extract::extract(&tree, env.goals(), &self.config)?;
        let mut generator = synth::synthesize(&parts, &self.config, &mut names);
        generator.pat = shape.pat;
        Ok(Inverted {
            generator,
            residual: shape.residual,
        })
    }

    /// Rewrite `from <pat> where <call> andalso ... [steps]`, whose single
    /// scan has no source, into a scan over the inverted generator.
    pub fn rewrite_query(&self, query: &Query) -> Result<Query, NotInvertible> {
        let [scan] = query.scans.as_slice() else {
            return Err(NotInvertible::no_match("query has more than one scan"));
        };
        if scan.source.is_some() {
            return Err(NotInvertible::no_match(format!("`{}` already has a source", scan.pat)));
        }
        let Some((Step::Where(cond), rest)) = query.steps.split_first() else {
            return Err(NotInvertible::no_match("query does not start with `where`"));
        };

        let conjuncts = cond.conjuncts();
        let Some(index) = conjuncts.iter().position(|c| self.is_user_call(c)) else {
            return Err(NotInvertible::no_match(format!("no predicate call in `{cond}`")));
        };
        let goals = scan.pat.vars();
        let inverted = self.invert(conjuncts[index], &goals, &BTreeMap::new())?;

        let mut filters = inverted.residual.clone();
        filters.extend(
            conjuncts
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, c)| (*c).clone()),
        );
        let mut steps = Vec::with_capacity(query.steps.len() + 1);
        if !filters.is_empty() {
            steps.push(Step::Where(Expr::conjunction(filters)));
        }
        steps.extend(rest.iter().cloned());
        if inverted.generator.pat != scan.pat && !query.has_yield() {
            let Some(row) = scan.pat.to_expr() else {
                return Err(NotInvertible::no_match(format!("cannot project onto `{}`", scan.pat)));
            };
            steps.push(Step::Yield(row));
        }
        Ok(Query {
            scans: vec![inverted.scan()],
            steps,
        })
    }

    /// [`Self::rewrite_query`] on a `from` expression.
    pub fn rewrite(&self, expr: &Expr) -> Result<Expr, NotInvertible> {
        match expr {
            Expr::From(query) => Ok(Expr::From(Box::new(self.rewrite_query(query)?))),
            _ => Err(NotInvertible::no_match(format!("`{expr}` is not a `from` query"))),
        }
    }

    fn is_user_call(&self, expr: &Expr) -> bool {
        expr.as_named_call()
            .is_some_and(|(f, _)| matches!(self.lookup.lookup(f), Some(Binding::Function { .. })))
    }
}

// ============================================================================
// Call-site binding
// ============================================================================

/// How the caller's argument lines up with the predicate's parameter.
#[derive(Debug)]
struct CallShape {
    /// Variables the inverted body produces, in parameter order.
    goals: Vec<Name>,
    /// Parameter variables to replace in the body.
    renames: BTreeMap<Name, Expr>,
    /// Pattern the caller scans the result with.
    pat: Pat,
    /// `fresh = argument` for literal, bound or repeated components.
    residual: Vec<Expr>,
}

fn bind_call(
    param: &Pat,
    arg: &Expr,
    goals: &[Name],
    bound: &BTreeMap<Name, Generator>,
    names: &mut NameGen,
) -> Result<CallShape, NotInvertible> {
    let wanted: BTreeSet<&Name> = goals.iter().filter(|g| !bound.contains_key(*g)).collect();

    // `path p` against `fun path (x, y)`: the parameter's variables become
    // the goals and the caller scans whole rows.
    if let (Pat::Tuple(formals), Expr::Var(whole)) = (param, arg) {
        if wanted.contains(whole) {
            let mut shape = CallShape {
                goals: Vec::with_capacity(formals.len()),
                renames: BTreeMap::new(),
                pat: Pat::Var(whole.clone()),
                residual: Vec::new(),
            };
            for formal in formals {
                let Pat::Var(v) = formal else {
                    return Err(NotInvertible::no_match(format!("parameter `{param}` is not flat")));
                };
                // Parameter names that mean something else at the call site.
                let clash = v == whole || goals.contains(v) || bound.contains_key(v);
                let goal = if clash { names.fresh(v) } else { v.clone() };
                if clash {
                    shape.renames.insert(v.clone(), Expr::var(goal.as_str()));
                }
                shape.goals.push(goal);
            }
            return Ok(shape);
        }
    }

    let pairs: Vec<(&Pat, &Expr)> = match (param, arg) {
        (Pat::Tuple(formals), Expr::Tuple(items)) if formals.len() == items.len() => {
            formals.iter().zip(items).collect()
        }
        (Pat::Var(_), _) => vec![(param, arg)],
        _ => {
            return Err(NotInvertible::no_match(format!(
                "argument `{arg}` does not fit parameter `{param}`"
            )))
        }
    };

    let mut shape = CallShape {
        goals: Vec::with_capacity(pairs.len()),
        renames: BTreeMap::new(),
        pat: Pat::Wildcard,
        residual: Vec::new(),
    };
    for (formal, item) in pairs {
        let Pat::Var(formal) = formal else {
            return Err(NotInvertible::no_match(format!("parameter `{param}` is not flat")));
        };
        let component = match item {
            Expr::Var(v) if wanted.contains(v) && !shape.goals.contains(v) => v.clone(),
            // Literals, context variables and repeated goals.
            _ => {
                let fresh = names.fresh(formal);
                shape
                    .residual
                    .push(Expr::equals(Expr::var(fresh.as_str()), item.clone()));
                fresh
            }
        };
        shape.renames.insert(formal.clone(), Expr::var(component.as_str()));
        shape.goals.push(component);
    }
    if let Some(missing) = wanted.iter().find(|g| !shape.goals.contains(**g)) {
        return Err(NotInvertible::no_match(format!("`{missing}` is not an argument of the call")));
    }
    shape.pat = tuple_pat(&shape.goals);
    Ok(shape)
}
