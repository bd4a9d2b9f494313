//! fixq reference evaluator
//!
//! Evaluates fixq programs and queries. Besides the ordinary language it
//! provides the runtime fixpoint primitives the inversion pass emits:
//!
//! - `List.iterate base step`
//! - `Bag.iterate base step`
//!
//! Both apply `step (old, new)` semi-naively until no new rows appear.

pub mod env;
pub mod eval;
pub mod value;

pub use env::Env;
pub use eval::{EvalConfig, EvalError, EvalResult, Evaluator};
pub use value::{Builtin, Value};
