//! Variable environment threaded through tree construction.

use fixq_dsl::Name;
use std::collections::{BTreeMap, BTreeSet};

use crate::generator::Generator;

/// Which variables must be produced, which are already produced (and by
/// what), and which are shared between conjuncts.
///
/// Values are never mutated; every update returns a new environment so that
/// sibling branches see the same starting point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    goals: Vec<Name>,
    bound: BTreeMap<Name, Generator>,
    joins: BTreeSet<Name>,
}

impl Environment {
    pub fn initial(goals: &[Name]) -> Self {
        Self::initial_with_bindings(goals, &BTreeMap::new())
    }

    /// Goals that `preset` already binds are dropped.
    pub fn initial_with_bindings(goals: &[Name], preset: &BTreeMap<Name, Generator>) -> Self {
        let mut unique: Vec<Name> = Vec::with_capacity(goals.len());
        for g in goals {
            if !preset.contains_key(g) && !unique.contains(g) {
                unique.push(g.clone());
            }
        }
        Environment {
            goals: unique,
            bound: preset.clone(),
            joins: BTreeSet::new(),
        }
    }

    pub fn with_bound(&self, var: impl Into<Name>, generator: Generator) -> Self {
        let mut next = self.clone();
        next.bound.insert(var.into(), generator);
        next
    }

    /// Bind every variable of `generator`'s pattern that is not yet bound.
    pub fn with_generator(&self, generator: &Generator) -> Self {
        let mut next = self.clone();
        for var in generator.pat.vars() {
            next.bound.entry(var).or_insert_with(|| generator.clone());
        }
        next
    }

    pub fn with_join_var(&self, var: impl Into<Name>) -> Self {
        let mut next = self.clone();
        next.joins.insert(var.into());
        next
    }

    pub fn with_join_vars<'a>(&self, vars: impl IntoIterator<Item = &'a Name>) -> Self {
        let mut next = self.clone();
        next.joins.extend(vars.into_iter().cloned());
        next
    }

    pub fn goals(&self) -> &[Name] {
        &self.goals
    }

    pub fn is_goal(&self, var: &str) -> bool {
        self.goals.iter().any(|g| g == var)
    }

    pub fn is_bound(&self, var: &str) -> bool {
        self.bound.contains_key(var)
    }

    pub fn is_join(&self, var: &str) -> bool {
        self.joins.contains(var)
    }

    pub fn generator_of(&self, var: &str) -> Option<&Generator> {
        self.bound.get(var)
    }

    pub fn unbound_goals(&self) -> Vec<&Name> {
        self.goals.iter().filter(|g| !self.is_bound(g)).collect()
    }
}

/// Functions whose bodies are currently being expanded.
///
/// A call to one of these becomes a recursive leaf instead of being unfolded
/// again, which bounds the depth of the analysis tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveFunctions(BTreeSet<Name>);

impl ActiveFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(&self, name: impl Into<Name>) -> Self {
        let mut next = self.clone();
        next.0.insert(name.into());
        next
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}
