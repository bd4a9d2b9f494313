//! Fresh names and capture-avoiding substitution.

use crate::ast::{Expr, Name, Pat, Query, Scan, Step};
use std::collections::{BTreeMap, BTreeSet};

/// Deterministic fresh-name supply.
///
/// Names are derived from a stem (`z` → `z_1`, `z_2`, ...) and never collide
/// with a reserved name. Two generators seeded with the same names produce the
/// same sequence, which keeps rewrites reproducible.
#[derive(Debug, Clone, Default)]
pub struct NameGen {
    used: BTreeSet<Name>,
}

impl NameGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reserved<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Name>,
    {
        let mut gen = Self::new();
        gen.reserve_all(names);
        gen
    }

    pub fn reserve(&mut self, name: impl Into<Name>) {
        self.used.insert(name.into());
    }

    pub fn reserve_all<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Name>,
    {
        for name in names {
            self.reserve(name);
        }
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// A new name derived from `base`, reserved before it is returned.
    pub fn fresh(&mut self, base: &str) -> Name {
        let stem = stem_of(base);
        let mut i = 1usize;
        loop {
            let candidate = format!("{stem}_{i}");
            if !self.used.contains(&candidate) {
                self.used.insert(candidate.clone());
                return candidate;
            }
            i += 1;
        }
    }

    /// `base` itself if unused, otherwise a fresh variant.
    pub fn claim(&mut self, base: &str) -> Name {
        if self.used.insert(base.to_string()) {
            base.to_string()
        } else {
            self.fresh(base)
        }
    }
}

fn stem_of(name: &str) -> &str {
    match name.rsplit_once('_') {
        Some((stem, digits))
            if !stem.is_empty() && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) =>
        {
            stem
        }
        _ => name,
    }
}

/// Replace free occurrences of the keys of `map` in `expr`.
///
/// Binders (`fn` parameters, comprehension scans) that would capture a free
/// variable of a replacement are renamed using `names`.
pub fn substitute(expr: &Expr, map: &BTreeMap<Name, Expr>, names: &mut NameGen) -> Expr {
    if map.is_empty() {
        return expr.clone();
    }
    match expr {
        Expr::Literal(_) => expr.clone(),
        Expr::Var(name) => map.get(name).cloned().unwrap_or_else(|| expr.clone()),
        Expr::Tuple(items) => Expr::Tuple(items.iter().map(|e| substitute(e, map, names)).collect()),
        Expr::List(items) => Expr::List(items.iter().map(|e| substitute(e, map, names)).collect()),
        Expr::Apply { func, arg } => Expr::apply(substitute(func, map, names), substitute(arg, map, names)),
        Expr::Fn { param, body } => {
            let (param, inner) = enter_binder(param, map, names);
            Expr::lambda(param, substitute(body, &inner, names))
        }
        Expr::AndAlso(l, r) => Expr::and_also(substitute(l, map, names), substitute(r, map, names)),
        Expr::OrElse(l, r) => Expr::or_else(substitute(l, map, names), substitute(r, map, names)),
        Expr::Binary { op, left, right } => {
            Expr::binary(*op, substitute(left, map, names), substitute(right, map, names))
        }
        Expr::From(q) => Expr::From(Box::new(substitute_query(q, map, names))),
        Expr::Exists(q) => Expr::Exists(Box::new(substitute_query(q, map, names))),
    }
}

fn substitute_query(query: &Query, map: &BTreeMap<Name, Expr>, names: &mut NameGen) -> Query {
    let mut current = map.clone();
    let mut scans = Vec::with_capacity(query.scans.len());
    for scan in &query.scans {
        let source = scan.source.as_ref().map(|s| substitute(s, &current, names));
        let (pat, inner) = enter_binder(&scan.pat, &current, names);
        current = inner;
        scans.push(Scan { pat, source });
    }
    let steps = query
        .steps
        .iter()
        .map(|step| match step {
            Step::Where(e) => Step::Where(substitute(e, &current, names)),
            Step::Yield(e) => Step::Yield(substitute(e, &current, names)),
        })
        .collect();
    Query { scans, steps }
}

/// Shadow the pattern's variables in `map`, renaming any that would capture a
/// free variable of a remaining replacement.
fn enter_binder(
    pat: &Pat,
    map: &BTreeMap<Name, Expr>,
    names: &mut NameGen,
) -> (Pat, BTreeMap<Name, Expr>) {
    let bound = pat.vars();
    let mut inner: BTreeMap<Name, Expr> = map
        .iter()
        .filter(|(k, _)| !bound.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let captured: BTreeSet<Name> = inner.values().flat_map(Expr::free_vars).collect();
    let mut renames: BTreeMap<Name, Name> = BTreeMap::new();
    for v in bound.iter().filter(|v| captured.contains(*v)) {
        let fresh = names.fresh(v);
        inner.insert(v.clone(), Expr::Var(fresh.clone()));
        renames.insert(v.clone(), fresh);
    }
    if renames.is_empty() {
        return (pat.clone(), inner);
    }
    let pat = pat.rename(&|name| renames.get(name).cloned());
    (pat, inner)
}

/// Rename free variables according to `renames`.
pub fn rename_free(expr: &Expr, renames: &BTreeMap<Name, Name>, names: &mut NameGen) -> Expr {
    let map: BTreeMap<Name, Expr> = renames
        .iter()
        .map(|(from, to)| (from.clone(), Expr::Var(to.clone())))
        .collect();
    substitute(expr, &map, names)
}
