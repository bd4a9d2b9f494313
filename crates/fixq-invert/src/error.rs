use fixq_dsl::Name;
use thiserror::Error;

/// Why a predicate could not be turned into a generator.
///
/// Every variant means "fall back to enumerate-and-filter"; none of them is a
/// fault in the program being compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotInvertible {
    #[error("predicate does not match the transitive-closure shape: {reason}")]
    NoMatch { reason: String },

    #[error("base case is not provably finite: {reason}")]
    UnboundedBase { reason: String },

    #[error("recursive call shares no join variable with the step clauses")]
    NoJoinVariable,

    #[error("disjunct contains {count} recursive calls; only linear recursion is supported")]
    NonLinearRecursion { count: usize },

    #[error("`{name}` does not name a function")]
    UnresolvedBinding { name: Name },
}

impl NotInvertible {
    pub fn no_match(reason: impl Into<String>) -> Self {
        NotInvertible::NoMatch {
            reason: reason.into(),
        }
    }

    pub fn unbounded(reason: impl Into<String>) -> Self {
        NotInvertible::UnboundedBase {
            reason: reason.into(),
        }
    }
}
