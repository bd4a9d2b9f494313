//! Generators: finite or infinite sources of bindings.

use fixq_dsl::{BinOp, Expr, Name, Pat, Query, Scan, Step, Type};
use serde::{Deserialize, Serialize};

use crate::binding::{Binding, BindingLookup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Finite,
    Infinite,
}

impl Cardinality {
    pub fn join(self, other: Cardinality) -> Cardinality {
        if self == Cardinality::Infinite || other == Cardinality::Infinite {
            Cardinality::Infinite
        } else {
            Cardinality::Finite
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    List,
    Bag,
}

impl CollectionKind {
    pub fn join(self, other: CollectionKind) -> CollectionKind {
        if self == CollectionKind::Bag || other == CollectionKind::Bag {
            CollectionKind::Bag
        } else {
            CollectionKind::List
        }
    }

    pub fn of_type(ty: &Type) -> CollectionKind {
        if ty.is_bag() {
            CollectionKind::Bag
        } else {
            CollectionKind::List
        }
    }

    /// The fixpoint primitive overload for this collection kind.
    pub fn iterate_builtin(self) -> &'static str {
        match self {
            CollectionKind::List => "List.iterate",
            CollectionKind::Bag => "Bag.iterate",
        }
    }
}

/// `pat in source`, with what is known about `source`.
#[derive(Debug, Clone, PartialEq)]
pub struct Generator {
    pub pat: Pat,
    pub source: Expr,
    pub kind: CollectionKind,
    pub cardinality: Cardinality,
}

impl Generator {
    pub fn is_finite(&self) -> bool {
        self.cardinality == Cardinality::Finite
    }

    pub fn scan(&self) -> Scan {
        Scan {
            pat: self.pat.clone(),
            source: Some(self.source.clone()),
        }
    }

    /// `x in [e]`: a single known value.
    pub fn singleton(pat: Pat, value: Expr) -> Self {
        Generator {
            pat,
            source: Expr::List(vec![value]),
            kind: CollectionKind::List,
            cardinality: Cardinality::Finite,
        }
    }

    /// A generator whose source is `from <pat> where <condition>`: the extent
    /// of `pat`, filtered.
    pub fn extent(pat: Pat, condition: Expr) -> Self {
        let source = Expr::From(Box::new(Query {
            scans: vec![Scan {
                pat: pat.clone(),
                source: None,
            }],
            steps: vec![Step::Where(condition)],
        }));
        Generator {
            pat,
            source,
            kind: CollectionKind::List,
            cardinality: Cardinality::Infinite,
        }
    }

    /// Cross product of `parts`, filtered by `residual`, projected onto
    /// `output`.
    pub fn join(parts: &[Generator], residual: Vec<Expr>, output: &[Name]) -> Generator {
        let mut steps = Vec::new();
        if !residual.is_empty() {
            steps.push(Step::Where(Expr::conjunction(residual)));
        }
        steps.push(Step::Yield(Expr::tuple(output.iter().map(Expr::var).collect())));
        let kind = parts
            .iter()
            .fold(CollectionKind::List, |k, g| k.join(g.kind));
        let cardinality = parts
            .iter()
            .fold(Cardinality::Finite, |c, g| c.join(g.cardinality));
        Generator {
            pat: tuple_pat(output),
            source: Expr::From(Box::new(Query {
                scans: parts.iter().map(Generator::scan).collect(),
                steps,
            })),
            kind,
            cardinality,
        }
    }
}

pub fn tuple_pat(names: &[Name]) -> Pat {
    match names {
        [single] => Pat::Var(single.clone()),
        _ => Pat::Tuple(names.iter().cloned().map(Pat::Var).collect()),
    }
}

// ============================================================================
// Source analysis
// ============================================================================

const MAX_VAL_CHAIN: usize = 32;

/// Collection kind and cardinality of `source` as a scan source.
///
/// Only compile-time-enumerable sources are finite: list literals, `val`s
/// whose contents are known, and comprehensions and appends over those.
pub fn source_shape(source: &Expr, lookup: &dyn BindingLookup) -> (CollectionKind, Cardinality) {
    shape(source, lookup, 0)
}

fn shape(source: &Expr, lookup: &dyn BindingLookup, depth: usize) -> (CollectionKind, Cardinality) {
    const UNKNOWN: (CollectionKind, Cardinality) = (CollectionKind::List, Cardinality::Infinite);
    if depth > MAX_VAL_CHAIN {
        return UNKNOWN;
    }
    match source {
        Expr::List(_) => (CollectionKind::List, Cardinality::Finite),
        Expr::Var(name) => match lookup.lookup(name) {
            Some(Binding::Value { ty, known }) => {
                let declared = ty.as_ref().map(CollectionKind::of_type);
                match known {
                    Some(value) => {
                        let (kind, card) = shape(&value, lookup, depth + 1);
                        (declared.unwrap_or(kind), card)
                    }
                    None => (declared.unwrap_or(CollectionKind::List), Cardinality::Infinite),
                }
            }
            _ => UNKNOWN,
        },
        Expr::Binary {
            op: BinOp::Append,
            left,
            right,
        } => {
            let (lk, lc) = shape(left, lookup, depth);
            let (rk, rc) = shape(right, lookup, depth);
            (lk.join(rk), lc.join(rc))
        }
        Expr::From(q) => q.scans.iter().fold(
            (CollectionKind::List, Cardinality::Finite),
            |(kind, card), scan| match &scan.source {
                Some(s) => {
                    let (k, c) = shape(s, lookup, depth);
                    (kind.join(k), card.join(c))
                }
                None => (kind, Cardinality::Infinite),
            },
        ),
        _ => UNKNOWN,
    }
}
