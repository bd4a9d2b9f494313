//! Runtime values.

use fixq_dsl::{Expr, Literal, Pat};
use std::fmt;
use std::rc::Rc;

use crate::env::Env;

#[derive(Debug, Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Str(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Bag(Vec<Value>),
    Closure(Rc<Closure>),
    /// A builtin with the arguments supplied so far.
    Builtin(Builtin, Vec<Value>),
}

#[derive(Debug)]
pub struct Closure {
    pub param: Pat,
    pub body: Expr,
    pub env: Env,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Not,
    /// `List.iterate : 'a list -> ('a list * 'a list -> 'a list) -> 'a list`
    ListIterate,
    /// `Bag.iterate : 'a bag -> ('a bag * 'a bag -> 'a bag) -> 'a bag`
    BagIterate,
}

impl Builtin {
    pub const ALL: [Builtin; 3] = [Builtin::Not, Builtin::ListIterate, Builtin::BagIterate];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Not => "not",
            Builtin::ListIterate => "List.iterate",
            Builtin::BagIterate => "Bag.iterate",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Not => 1,
            Builtin::ListIterate | Builtin::BagIterate => 2,
        }
    }

    pub fn lookup(name: &str) -> Option<Builtin> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

impl Value {
    pub fn from_literal(lit: &Literal) -> Value {
        match lit {
            Literal::Unit => Value::Unit,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::Int(*n),
            Literal::Str(s) => Value::Str(s.clone()),
        }
    }

    pub fn pair(a: i64, b: i64) -> Value {
        Value::Tuple(vec![Value::Int(a), Value::Int(b)])
    }

    /// Elements of a list or bag.
    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Bag(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_elements(self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) | Value::Bag(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_bag(&self) -> bool {
        matches!(self, Value::Bag(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Bag(_) => "bag",
            Value::Closure(_) | Value::Builtin(..) => "function",
        }
    }

    /// Convert back into a literal expression, for data values only.
    pub fn to_expr(&self) -> Option<Expr> {
        Some(match self {
            Value::Unit => Expr::Literal(Literal::Unit),
            Value::Bool(b) => Expr::bool(*b),
            Value::Int(n) => Expr::int(*n),
            Value::Str(s) => Expr::Literal(Literal::Str(s.clone())),
            Value::Tuple(items) => Expr::Tuple(items.iter().map(Value::to_expr).collect::<Option<_>>()?),
            Value::List(items) => Expr::List(items.iter().map(Value::to_expr).collect::<Option<_>>()?),
            Value::Bag(_) | Value::Closure(_) | Value::Builtin(..) => return None,
        })
    }

    /// Bind `pat` against this value, extending `env`.
    pub fn bind(&self, pat: &Pat, env: &Env) -> Option<Env> {
        match (pat, self) {
            (Pat::Wildcard, _) => Some(env.clone()),
            (Pat::Var(name), v) => Some(env.bind(name.clone(), v.clone())),
            (Pat::Literal(lit), v) => (Value::from_literal(lit) == *v).then(|| env.clone()),
            (Pat::Tuple(pats), Value::Tuple(items)) if pats.len() == items.len() => {
                let mut env = env.clone();
                for (p, v) in pats.iter().zip(items) {
                    env = v.bind(p, &env)?;
                }
                Some(env)
            }
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) | (Value::List(a), Value::List(b)) => a == b,
            (Value::Bag(a), Value::Bag(b)) => same_multiset(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a, xs), Value::Builtin(b, ys)) => a == b && xs == ys,
            _ => false,
        }
    }
}

fn same_multiset(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    'outer: for x in a {
        for (i, y) in b.iter().enumerate() {
            if !used[i] && x == y {
                used[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn items(f: &mut fmt::Formatter<'_>, xs: &[Value]) -> fmt::Result {
            for (i, x) in xs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{x}")?;
            }
            Ok(())
        }
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{}", Literal::Int(*n)),
            Value::Str(s) => write!(f, "{}", Literal::Str(s.clone())),
            Value::Tuple(xs) => {
                write!(f, "(")?;
                items(f, xs)?;
                write!(f, ")")
            }
            Value::List(xs) => {
                write!(f, "[")?;
                items(f, xs)?;
                write!(f, "]")
            }
            Value::Bag(xs) => {
                write!(f, "bag [")?;
                items(f, xs)?;
                write!(f, "]")
            }
            Value::Closure(c) => write!(f, "fn {} => ...", c.param),
            Value::Builtin(b, _) => write!(f, "{}", b.name()),
        }
    }
}
