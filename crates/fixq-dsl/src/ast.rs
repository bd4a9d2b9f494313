//! Core syntax tree for fixq programs.
//!
//! The language is a small, ML-flavoured core:
//! - `val` / `fun` declarations,
//! - boolean connectives `andalso` / `orelse`,
//! - comprehensions `from <scans> [where ..] [yield ..]` and their boolean
//!   cousin `exists <scans> where ..`,
//! - first-class lambdas (`fn pat => expr`), used by the fixpoint step functions
//!   the inversion pass synthesizes.
//!
//! `Display` renders every node back into surface syntax that re-parses to an
//! equal tree; see `parser::parse_expr`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type Name = String;

// ============================================================================
// Literals, types, patterns
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "tag", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "tag", content = "args", rename_all = "snake_case")]
pub enum Type {
    Unit,
    Bool,
    Int,
    String,
    Tuple(Vec<Type>),
    List(Box<Type>),
    Bag(Box<Type>),
}

impl Type {
    /// Element type of a collection type.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::List(t) | Type::Bag(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_bag(&self) -> bool {
        matches!(self, Type::Bag(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "tag", content = "value", rename_all = "snake_case")]
pub enum Pat {
    Wildcard,
    Var(Name),
    Literal(Literal),
    Tuple(Vec<Pat>),
}

impl Pat {
    pub fn var(name: impl Into<Name>) -> Self {
        Pat::Var(name.into())
    }

    /// Variables bound by this pattern, in left-to-right order.
    pub fn vars(&self) -> Vec<Name> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<Name>) {
        match self {
            Pat::Var(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Pat::Tuple(items) => items.iter().for_each(|p| p.collect_vars(out)),
            Pat::Wildcard | Pat::Literal(_) => {}
        }
    }

    /// The expression that rebuilds the value matched by this pattern.
    ///
    /// Returns `None` for patterns containing `_`.
    pub fn to_expr(&self) -> Option<Expr> {
        match self {
            Pat::Wildcard => None,
            Pat::Var(name) => Some(Expr::Var(name.clone())),
            Pat::Literal(lit) => Some(Expr::Literal(lit.clone())),
            Pat::Tuple(items) => items
                .iter()
                .map(Pat::to_expr)
                .collect::<Option<Vec<_>>>()
                .map(Expr::Tuple),
        }
    }

    /// Rename variables according to `rename`; names not in the map are kept.
    pub fn rename(&self, rename: &dyn Fn(&str) -> Option<Name>) -> Pat {
        match self {
            Pat::Var(name) => Pat::Var(rename(name).unwrap_or_else(|| name.clone())),
            Pat::Tuple(items) => Pat::Tuple(items.iter().map(|p| p.rename(rename)).collect()),
            other => other.clone(),
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Elem,
    Append,
    Add,
    Sub,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Elem => "elem",
            BinOp::Append => "@",
            BinOp::Add => "+",
            BinOp::Sub => "-",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Elem => {
                PREC_CMP
            }
            BinOp::Append => PREC_APPEND,
            BinOp::Add | BinOp::Sub => PREC_SUM,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "tag", content = "value", rename_all = "snake_case")]
pub enum Expr {
    Literal(Literal),
    Var(Name),
    /// Always has at least two components; `()` is `Literal::Unit`.
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Apply {
        func: Box<Expr>,
        arg: Box<Expr>,
    },
    Fn {
        param: Pat,
        body: Box<Expr>,
    },
    AndAlso(Box<Expr>, Box<Expr>),
    OrElse(Box<Expr>, Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    From(Box<Query>),
    Exists(Box<Query>),
}

/// A comprehension body shared by `from` and `exists`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Query {
    pub scans: Vec<Scan>,
    pub steps: Vec<Step>,
}

/// `pat in source`, or a bare `pat` ranging over its type's unbounded extent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Scan {
    pub pat: Pat,
    pub source: Option<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "tag", content = "expr", rename_all = "snake_case")]
pub enum Step {
    Where(Expr),
    Yield(Expr),
}

impl Query {
    pub fn has_yield(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, Step::Yield(_)))
    }

    pub fn has_where(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, Step::Where(_)))
    }

    /// Variables bound by the scans, in order.
    pub fn scan_vars(&self) -> Vec<Name> {
        let mut out = Vec::new();
        for scan in &self.scans {
            for v in scan.pat.vars() {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
        out
    }
}

impl Expr {
    pub fn var(name: impl Into<Name>) -> Self {
        Expr::Var(name.into())
    }

    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Expr::Literal(Literal::Bool(value))
    }

    pub fn apply(func: Expr, arg: Expr) -> Self {
        Expr::Apply {
            func: Box::new(func),
            arg: Box::new(arg),
        }
    }

    pub fn lambda(param: Pat, body: Expr) -> Self {
        Expr::Fn {
            param,
            body: Box::new(body),
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equals(left: Expr, right: Expr) -> Self {
        Expr::binary(BinOp::Eq, left, right)
    }

    pub fn and_also(left: Expr, right: Expr) -> Self {
        Expr::AndAlso(Box::new(left), Box::new(right))
    }

    pub fn or_else(left: Expr, right: Expr) -> Self {
        Expr::OrElse(Box::new(left), Box::new(right))
    }

    /// Left-nested conjunction of `terms`; `true` when empty.
    pub fn conjunction(terms: Vec<Expr>) -> Self {
        let mut iter = terms.into_iter();
        match iter.next() {
            None => Expr::bool(true),
            Some(first) => iter.fold(first, Expr::and_also),
        }
    }

    /// Tuple of `items`, collapsing the 0- and 1-element cases.
    pub fn tuple(mut items: Vec<Expr>) -> Self {
        match items.len() {
            0 => Expr::Literal(Literal::Unit),
            1 => items.remove(0),
            _ => Expr::Tuple(items),
        }
    }

    /// `f` and `arg` when this is a call of a named function.
    pub fn as_named_call(&self) -> Option<(&str, &Expr)> {
        match self {
            Expr::Apply { func, arg } => match func.as_ref() {
                Expr::Var(name) => Some((name.as_str(), arg.as_ref())),
                _ => None,
            },
            _ => None,
        }
    }

    /// Flatten nested `andalso` into an ordered conjunct list.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        fn go<'a>(e: &'a Expr, out: &mut Vec<&'a Expr>) {
            match e {
                Expr::AndAlso(l, r) => {
                    go(l, out);
                    go(r, out);
                }
                other => out.push(other),
            }
        }
        go(self, &mut out);
        out
    }

    /// Flatten nested `orelse` into an ordered disjunct list.
    pub fn disjuncts(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        fn go<'a>(e: &'a Expr, out: &mut Vec<&'a Expr>) {
            match e {
                Expr::OrElse(l, r) => {
                    go(l, out);
                    go(r, out);
                }
                other => out.push(other),
            }
        }
        go(self, &mut out);
        out
    }

    /// The pattern matching exactly the values this expression builds, if it is
    /// built only from variables, literals and tuples.
    pub fn to_pat(&self) -> Option<Pat> {
        match self {
            Expr::Var(name) => Some(Pat::Var(name.clone())),
            Expr::Literal(lit) => Some(Pat::Literal(lit.clone())),
            Expr::Tuple(items) => items
                .iter()
                .map(Expr::to_pat)
                .collect::<Option<Vec<_>>>()
                .map(Pat::Tuple),
            _ => None,
        }
    }

    /// Free variables (including free function names).
    pub fn free_vars(&self) -> BTreeSet<Name> {
        let mut out = BTreeSet::new();
        self.collect_free(&mut Vec::new(), &mut out);
        out
    }

    fn collect_free(&self, scope: &mut Vec<Name>, out: &mut BTreeSet<Name>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                if !scope.contains(name) {
                    out.insert(name.clone());
                }
            }
            Expr::Tuple(items) | Expr::List(items) => {
                items.iter().for_each(|e| e.collect_free(scope, out))
            }
            Expr::Apply { func, arg } => {
                func.collect_free(scope, out);
                arg.collect_free(scope, out);
            }
            Expr::Fn { param, body } => {
                let vars = param.vars();
                let depth = scope.len();
                scope.extend(vars);
                body.collect_free(scope, out);
                scope.truncate(depth);
            }
            Expr::AndAlso(l, r) | Expr::OrElse(l, r) => {
                l.collect_free(scope, out);
                r.collect_free(scope, out);
            }
            Expr::Binary { left, right, .. } => {
                left.collect_free(scope, out);
                right.collect_free(scope, out);
            }
            Expr::From(q) | Expr::Exists(q) => {
                let depth = scope.len();
                for scan in &q.scans {
                    if let Some(source) = &scan.source {
                        source.collect_free(scope, out);
                    }
                    scope.extend(scan.pat.vars());
                }
                for step in &q.steps {
                    match step {
                        Step::Where(e) | Step::Yield(e) => e.collect_free(scope, out),
                    }
                }
                scope.truncate(depth);
            }
        }
    }

    /// Every identifier mentioned anywhere (free, bound or binding).
    pub fn all_names(&self) -> BTreeSet<Name> {
        let mut out = BTreeSet::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut BTreeSet<Name>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Tuple(items) | Expr::List(items) => items.iter().for_each(|e| e.collect_names(out)),
            Expr::Apply { func, arg } => {
                func.collect_names(out);
                arg.collect_names(out);
            }
            Expr::Fn { param, body } => {
                out.extend(param.vars());
                body.collect_names(out);
            }
            Expr::AndAlso(l, r) | Expr::OrElse(l, r) => {
                l.collect_names(out);
                r.collect_names(out);
            }
            Expr::Binary { left, right, .. } => {
                left.collect_names(out);
                right.collect_names(out);
            }
            Expr::From(q) | Expr::Exists(q) => {
                for scan in &q.scans {
                    out.extend(scan.pat.vars());
                    if let Some(source) = &scan.source {
                        source.collect_names(out);
                    }
                }
                for step in &q.steps {
                    match step {
                        Step::Where(e) | Step::Yield(e) => e.collect_names(out),
                    }
                }
            }
        }
    }
}

// ============================================================================
// Declarations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum Decl {
    /// `val name [: ty] [= value]`.
    ///
    /// A `val` without a value is bound only at runtime: its contents are not
    /// available when the program is analysed.
    Val {
        name: Name,
        ty: Option<Type>,
        value: Option<Expr>,
    },
    Fun {
        name: Name,
        param: Pat,
        body: Expr,
    },
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Val { name, .. } | Decl::Fun { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Program {
    pub decls: Vec<Decl>,
}

impl Program {
    /// The last declaration named `name` (later declarations shadow earlier ones).
    pub fn decl(&self, name: &str) -> Option<&Decl> {
        self.decls.iter().rev().find(|d| d.name() == name)
    }
}

// ============================================================================
// Pretty printing
// ============================================================================

const PREC_LAMBDA: u8 = 0;
const PREC_ORELSE: u8 = 1;
const PREC_ANDALSO: u8 = 2;
const PREC_CMP: u8 = 3;
const PREC_APPEND: u8 = 4;
const PREC_SUM: u8 = 5;
const PREC_APP: u8 = 6;
const PREC_ATOM: u8 = 7;

impl Expr {
    fn precedence(&self) -> u8 {
        match self {
            Expr::Fn { .. } | Expr::From(_) | Expr::Exists(_) => PREC_LAMBDA,
            Expr::OrElse(..) => PREC_ORELSE,
            Expr::AndAlso(..) => PREC_ANDALSO,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Apply { .. } => PREC_APP,
            Expr::Literal(_) | Expr::Var(_) | Expr::Tuple(_) | Expr::List(_) => PREC_ATOM,
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "(")?;
            self.fmt_prec(f, PREC_LAMBDA)?;
            return write!(f, ")");
        }
        match self {
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Tuple(items) => {
                write!(f, "(")?;
                write_sep(f, items, ", ", PREC_ORELSE)?;
                write!(f, ")")
            }
            Expr::List(items) => {
                write!(f, "[")?;
                write_sep(f, items, ", ", PREC_ORELSE)?;
                write!(f, "]")
            }
            Expr::Apply { func, arg } => {
                func.fmt_prec(f, PREC_APP)?;
                write!(f, " ")?;
                arg.fmt_prec(f, PREC_ATOM)
            }
            Expr::Fn { param, body } => {
                write!(f, "fn {param} => ")?;
                body.fmt_prec(f, PREC_LAMBDA)
            }
            Expr::OrElse(l, r) => {
                l.fmt_prec(f, PREC_ORELSE)?;
                write!(f, " orelse ")?;
                r.fmt_prec(f, PREC_ANDALSO)
            }
            Expr::AndAlso(l, r) => {
                l.fmt_prec(f, PREC_ANDALSO)?;
                write!(f, " andalso ")?;
                r.fmt_prec(f, PREC_CMP)
            }
            Expr::Binary { op, left, right } => {
                let p = op.precedence();
                let (lp, rp) = match op {
                    // Comparisons do not chain.
                    BinOp::Eq
                    | BinOp::Ne
                    | BinOp::Lt
                    | BinOp::Le
                    | BinOp::Gt
                    | BinOp::Ge
                    | BinOp::Elem => (p + 1, p + 1),
                    // `@` is right-associative.
                    BinOp::Append => (p + 1, p),
                    BinOp::Add | BinOp::Sub => (p, p + 1),
                };
                left.fmt_prec(f, lp)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_prec(f, rp)
            }
            Expr::From(q) => {
                write!(f, "from ")?;
                fmt::Display::fmt(q.as_ref(), f)
            }
            Expr::Exists(q) => {
                write!(f, "exists ")?;
                fmt::Display::fmt(q.as_ref(), f)
            }
        }
    }
}

/// Items of tuples and lists: comprehensions and lambdas are bracketed so a
/// following `,` is not read as another scan.
fn write_sep(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str, prec: u8) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        item.fmt_prec(f, prec)?;
    }
    Ok(())
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, scan) in self.scans.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", scan.pat)?;
            if let Some(source) = &scan.source {
                write!(f, " in ")?;
                // A nested comprehension would swallow the following scans.
                source.fmt_prec(f, PREC_ORELSE)?;
            }
        }
        for step in &self.steps {
            match step {
                Step::Where(e) => {
                    write!(f, " where ")?;
                    e.fmt_prec(f, PREC_ORELSE)?;
                }
                Step::Yield(e) => {
                    write!(f, " yield ")?;
                    e.fmt_prec(f, PREC_ORELSE)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, PREC_LAMBDA)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Unit => write!(f, "()"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(n) if *n < 0 => write!(f, "~{}", n.unsigned_abs()),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Str(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}

impl fmt::Display for Pat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pat::Wildcard => write!(f, "_"),
            Pat::Var(name) => write!(f, "{name}"),
            Pat::Literal(lit) => write!(f, "{lit}"),
            Pat::Tuple(items) => {
                write!(f, "(")?;
                for (i, p) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unit => write!(f, "unit"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::String => write!(f, "string"),
            Type::Tuple(items) => {
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " * ")?;
                    }
                    if matches!(t, Type::Tuple(_)) {
                        write!(f, "({t})")?;
                    } else {
                        write!(f, "{t}")?;
                    }
                }
                Ok(())
            }
            Type::List(t) | Type::Bag(t) => {
                if matches!(t.as_ref(), Type::Tuple(_)) {
                    write!(f, "({t})")?;
                } else {
                    write!(f, "{t}")?;
                }
                write!(f, " {}", if self.is_bag() { "bag" } else { "list" })
            }
        }
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decl::Val { name, ty, value } => {
                write!(f, "val {name}")?;
                if let Some(ty) = ty {
                    write!(f, " : {ty}")?;
                }
                if let Some(value) = value {
                    write!(f, " = {value}")?;
                }
                Ok(())
            }
            Decl::Fun { name, param, body } => write!(f, "fun {name} {param} = {body}"),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for decl in &self.decls {
            writeln!(f, "{decl};")?;
        }
        Ok(())
    }
}
