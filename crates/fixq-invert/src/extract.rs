//! Matches the transitive-closure shape in an analysis tree.

use fixq_dsl::{Expr, Name, Pat};
use std::collections::BTreeSet;

use crate::config::{DisjunctionPolicy, InvertConfig};
use crate::error::NotInvertible;
use crate::generator::Generator;
use crate::tree::{Inversion, Node, Terminal, TerminalKind};

/// The finite starting relation.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseCase {
    pub generator: Generator,
    pub residual: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepClause {
    Scan { generator: Generator, residual: Vec<Expr> },
    Filter(Expr),
    Recursive { function: Name, arg: Pat },
}

/// One recursive arm: its clauses in conjunct order.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCase {
    pub clauses: Vec<StepClause>,
    pub joins: BTreeSet<Name>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseComponents {
    pub goals: Vec<Name>,
    pub base: BaseCase,
    pub steps: Vec<StepCase>,
}

pub fn extract(root: &Node, goals: &[Name], config: &InvertConfig) -> Result<CaseComponents, NotInvertible> {
    let arms = root.arms();
    if arms.len() < 2 {
        return Err(NotInvertible::no_match("body is not a disjunction"));
    }
    let worst = arms.iter().map(|a| a.recursive_calls()).max().unwrap_or(0);
    if worst > 1 {
        return Err(NotInvertible::NonLinearRecursion { count: worst });
    }
    if worst == 0 {
        return Err(NotInvertible::no_match("no arm calls the predicate recursively"));
    }

    let (base_arm, step_arms): (&Node, Vec<&Node>) = if arms.len() == 2 {
        match (arms[0].is_recursive(), arms[1].is_recursive()) {
            (false, _) => (arms[0], vec![arms[1]]),
            (true, false) => (arms[1], vec![arms[0]]),
            (true, true) => return Err(NotInvertible::no_match("every arm is recursive")),
        }
    } else {
        match config.disjunction_policy {
            DisjunctionPolicy::BinaryOnly => {
                return Err(NotInvertible::no_match(format!(
                    "disjunction has {} arms",
                    arms.len()
                )))
            }
            DisjunctionPolicy::FirstArmBase => {
                if arms[0].is_recursive() {
                    return Err(NotInvertible::no_match("first arm is not a base case"));
                }
                if let Some(plain) = arms[1..].iter().position(|a| !a.is_recursive()) {
                    return Err(NotInvertible::no_match(format!(
                        "arm {} has no recursive call",
                        plain + 2
                    )));
                }
                (arms[0], arms[1..].to_vec())
            }
        }
    };
    if step_arms.len() > config.max_step_cases {
        return Err(NotInvertible::no_match(format!(
            "{} recursive arms exceed the limit of {}",
            step_arms.len(),
            config.max_step_cases
        )));
    }

    let base = base_case(base_arm, goals)?;
    let steps = step_arms
        .into_iter()
        .map(|arm| step_case(arm, goals))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CaseComponents {
        goals: goals.to_vec(),
        base,
        steps,
    })
}

fn base_case(node: &Node, goals: &[Name]) -> Result<BaseCase, NotInvertible> {
    let (generator, residual) = match node {
        Node::Terminal(Terminal {
            kind: TerminalKind::Inverted(inversion),
            ..
        }) => match inversion {
            Inversion::Generated { generator, residual } => (generator.clone(), residual.clone()),
            Inversion::Filter => return Err(NotInvertible::no_match("base case binds no goal variable")),
            Inversion::Failed { reason } => return Err(NotInvertible::no_match(reason.clone())),
        },
        Node::Sequence { children, .. } => {
            let mut parts = Vec::new();
            let mut residual = Vec::new();
            for child in children {
                match child {
                    Node::Terminal(Terminal {
                        term,
                        kind: TerminalKind::Inverted(inversion),
                    }) => match inversion {
                        Inversion::Generated {
                            generator,
                            residual: extra,
                        } => {
                            parts.push(generator.clone());
                            residual.extend(extra.iter().cloned());
                        }
                        Inversion::Filter => residual.push(term.clone()),
                        Inversion::Failed { reason } => return Err(NotInvertible::no_match(reason.clone())),
                    },
                    _ => return Err(NotInvertible::no_match("nested structure in base case")),
                }
            }
            if parts.is_empty() {
                return Err(NotInvertible::no_match("base case binds no goal variable"));
            }
            let covered: BTreeSet<Name> = parts.iter().flat_map(|g| g.pat.vars()).collect();
            if let Some(g) = goals.iter().find(|g| !covered.contains(*g)) {
                return Err(NotInvertible::unbounded(format!("base case does not bind `{g}`")));
            }
            (Generator::join(&parts, residual, goals), Vec::new())
        }
        Node::Branch { .. } => return Err(NotInvertible::no_match("nested disjunction in base case")),
        Node::Terminal(_) => return Err(NotInvertible::no_match("base case is recursive")),
    };

    if !generator.is_finite() {
        return Err(NotInvertible::unbounded(format!(
            "`{}` is not known at compile time",
            generator.source
        )));
    }
    let covered = generator.pat.vars();
    if let Some(g) = goals.iter().find(|g| !covered.contains(*g)) {
        return Err(NotInvertible::unbounded(format!("base case does not bind `{g}`")));
    }
    Ok(BaseCase { generator, residual })
}

fn step_case(node: &Node, goals: &[Name]) -> Result<StepCase, NotInvertible> {
    let (children, joins) = match node {
        Node::Sequence { children, joins } => (children, joins),
        Node::Terminal(_) => return Err(NotInvertible::no_match("recursive arm is a bare call")),
        Node::Branch { .. } => return Err(NotInvertible::no_match("nested disjunction in recursive arm")),
    };

    let mut clauses = Vec::with_capacity(children.len());
    let mut produced: BTreeSet<Name> = BTreeSet::new();
    let mut recursive_vars: Vec<Name> = Vec::new();
    let mut scans = 0usize;
    for child in children {
        let Node::Terminal(Terminal { term, kind }) = child else {
            return Err(NotInvertible::no_match("nested structure in recursive arm"));
        };
        match kind {
            TerminalKind::Recursive { function, arg } => {
                let Some(pat) = arg.to_pat() else {
                    return Err(NotInvertible::no_match(format!(
                        "recursive call `{term}` has a computed argument"
                    )));
                };
                recursive_vars = pat.vars();
                produced.extend(pat.vars());
                clauses.push(StepClause::Recursive {
                    function: function.clone(),
                    arg: pat,
                });
            }
            TerminalKind::Inverted(Inversion::Generated { generator, residual }) => {
                if !generator.is_finite() {
                    return Err(NotInvertible::no_match(format!("step clause `{term}` is not finite")));
                }
                scans += 1;
                produced.extend(generator.pat.vars());
                clauses.push(StepClause::Scan {
                    generator: generator.clone(),
                    residual: residual.clone(),
                });
            }
            TerminalKind::Inverted(Inversion::Filter) => clauses.push(StepClause::Filter(term.clone())),
            TerminalKind::Inverted(Inversion::Failed { reason }) => {
                return Err(NotInvertible::no_match(reason.clone()))
            }
        }
    }

    if scans == 0 {
        return Err(NotInvertible::no_match("recursive arm has no step relation"));
    }
    if !recursive_vars.iter().any(|v| joins.contains(v)) {
        return Err(NotInvertible::NoJoinVariable);
    }
    if let Some(g) = goals.iter().find(|g| !produced.contains(*g)) {
        return Err(NotInvertible::no_match(format!("recursive arm does not bind `{g}`")));
    }
    Ok(StepCase {
        clauses,
        joins: joins.clone(),
    })
}
