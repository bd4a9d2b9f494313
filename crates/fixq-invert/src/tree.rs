//! Analysis tree produced by the builder and consumed by the extractor.

use fixq_dsl::{Expr, Name};
use std::collections::BTreeSet;

use crate::generator::Generator;

/// Outcome of inverting one non-recursive clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Inversion {
    /// The clause is equivalent to scanning `generator` and keeping the rows
    /// that satisfy `residual`.
    Generated {
        generator: Generator,
        residual: Vec<Expr>,
    },
    /// Every variable of the clause is already bound; it only filters.
    Filter,
    Failed { reason: String },
}

impl Inversion {
    pub fn failed(reason: impl Into<String>) -> Self {
        Inversion::Failed {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalKind {
    /// Call of a function whose body is being expanded.
    Recursive { function: Name, arg: Expr },
    Inverted(Inversion),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Terminal {
    pub term: Expr,
    pub kind: TerminalKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Terminal(Terminal),
    /// Arms of a disjunction, built against the same environment.
    Branch { left: Box<Node>, right: Box<Node> },
    /// Conjuncts in order; each child saw the bindings of the ones before it.
    Sequence {
        children: Vec<Node>,
        joins: BTreeSet<Name>,
    },
}

impl Node {
    pub fn recursive_calls(&self) -> usize {
        match self {
            Node::Terminal(Terminal {
                kind: TerminalKind::Recursive { .. },
                ..
            }) => 1,
            Node::Terminal(_) => 0,
            Node::Branch { left, right } => left.recursive_calls() + right.recursive_calls(),
            Node::Sequence { children, .. } => children.iter().map(Node::recursive_calls).sum(),
        }
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive_calls() > 0
    }

    /// Arms of a right-leaning chain of branches, in order.
    pub fn arms(&self) -> Vec<&Node> {
        match self {
            Node::Branch { left, right } => {
                let mut out = vec![left.as_ref()];
                out.extend(right.arms());
                out
            }
            other => vec![other],
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Node::Terminal(_) => 1,
            Node::Branch { left, right } => 1 + left.depth().max(right.depth()),
            Node::Sequence { children, .. } => 1 + children.iter().map(Node::depth).max().unwrap_or(0),
        }
    }
}
