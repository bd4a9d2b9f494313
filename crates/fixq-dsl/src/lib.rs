//! fixq core language
//!
//! This crate defines the surface syntax of fixq programs and provides the
//! parser, a re-parseable pretty-printer, and the syntactic utilities the
//! inversion pass is built on (free variables, fresh names, capture-avoiding
//! substitution).
//!
//! Programs are sequences of `val` and `fun` declarations; queries are
//! comprehensions (`from p where path p`).

pub mod ast;
pub mod digest;
pub mod parser;
pub mod subst;

pub use ast::{BinOp, Decl, Expr, Literal, Name, Pat, Program, Query, Scan, Step, Type};
pub use parser::{parse_expr, parse_pat, parse_program, parse_type, ParseError};
pub use subst::NameGen;
