//! Pass configuration.

use serde::{Deserialize, Serialize};

/// How disjunctions with more than two arms are matched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisjunctionPolicy {
    /// The first arm is the base; every later arm is a recursive step.
    #[default]
    FirstArmBase,
    /// Only `base orelse step` (either order) is accepted.
    BinaryOnly,
}

/// Relation scanned by a step clause that ranges over the base relation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinSource {
    /// Join `new` against the step's own relation.
    #[default]
    StepRelation,
    /// Join `new` against everything accumulated so far (`old`).
    Accumulated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InvertConfig {
    /// When false every call is rejected, forcing the fallback.
    pub enabled: bool,
    pub disjunction_policy: DisjunctionPolicy,
    pub join_source: JoinSource,
    /// Upper bound on recursive arms in one predicate.
    pub max_step_cases: usize,
}

impl Default for InvertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disjunction_policy: DisjunctionPolicy::default(),
            join_source: JoinSource::default(),
            max_step_cases: 4,
        }
    }
}

impl InvertConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
