//! Tree-walking evaluator.
//!
//! This is the runtime the inversion pass targets: it provides the fixpoint
//! primitives (`List.iterate`, `Bag.iterate`) and, when no generator is
//! available, evaluates unbounded scans by enumerating a configured extent and
//! filtering (the fallback the pass is designed to avoid).

use fixq_dsl::{BinOp, Decl, Expr, Name, Pat, Program, Query, Step, Type};
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::trace;

use crate::env::Env;
use crate::value::{Builtin, Closure, Value};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("unbound variable `{name}`")]
    Unbound { name: Name },

    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("pattern `{pat}` does not match {value}")]
    MatchFailure { pat: String, value: String },

    #[error("scan `{pat}` has no source and no extent is configured")]
    UnboundedScan { pat: String },

    #[error("call depth exceeded the limit of {limit}")]
    DepthExceeded { limit: usize },

    #[error("`{builtin}` applied to a {found}")]
    OverloadMismatch { builtin: &'static str, found: &'static str },

    #[error("integer overflow")]
    Overflow,
}

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Call-depth limit; runaway recursion fails instead of overflowing the stack.
    pub max_depth: usize,
    /// Finite stand-in for the extent of a scan that has no source.
    pub extent: Option<Vec<Value>>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_depth: 512,
            extent: None,
        }
    }
}

impl EvalConfig {
    pub fn with_int_extent(mut self, lo: i64, hi: i64) -> Self {
        self.extent = Some((lo..=hi).map(Value::Int).collect());
        self
    }
}

// ============================================================================
// Evaluator
// ============================================================================

pub struct Evaluator {
    globals: HashMap<Name, Value>,
    declared: HashMap<Name, Option<Type>>,
    config: EvalConfig,
    depth: Cell<usize>,
}

impl Evaluator {
    /// Load `program`: functions become closures, `val`s with a value are
    /// evaluated in declaration order. Runtime-only `val`s stay unbound until
    /// [`Evaluator::bind`] supplies them.
    pub fn new(program: &Program, config: EvalConfig) -> EvalResult<Self> {
        let mut ev = Self {
            globals: HashMap::new(),
            declared: HashMap::new(),
            config,
            depth: Cell::new(0),
        };
        for decl in &program.decls {
            if let Decl::Fun { name, param, body } = decl {
                ev.globals.insert(name.clone(), closure(param, body, Env::new()));
            }
        }
        for decl in &program.decls {
            match decl {
                Decl::Val { name, ty, value } => {
                    ev.declared.insert(name.clone(), ty.clone());
                    match value {
                        Some(expr) => {
                            let v = coerce(ev.eval(expr)?, ty.as_ref());
                            ev.globals.insert(name.clone(), v);
                        }
                        None => {
                            ev.globals.remove(name);
                        }
                    }
                }
                Decl::Fun { name, param, body } => {
                    ev.declared.remove(name);
                    ev.globals.insert(name.clone(), closure(param, body, Env::new()));
                }
            }
        }
        Ok(ev)
    }

    /// Supply the value of a `val` (typically one declared without a value).
    pub fn bind(&mut self, name: impl Into<Name>, value: Value) {
        let name = name.into();
        let ty = self.declared.get(&name).cloned().flatten();
        self.globals.insert(name, coerce(value, ty.as_ref()));
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn eval(&self, expr: &Expr) -> EvalResult<Value> {
        self.eval_in(expr, &Env::new())
    }

    pub fn eval_in(&self, expr: &Expr, env: &Env) -> EvalResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(Value::from_literal(lit)),
            Expr::Var(name) => self.lookup(name, env),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items, env)?)),
            Expr::List(items) => Ok(Value::List(self.eval_all(items, env)?)),
            Expr::Apply { func, arg } => {
                let f = self.eval_in(func, env)?;
                let a = self.eval_in(arg, env)?;
                self.apply(f, a)
            }
            Expr::Fn { param, body } => Ok(closure(param, body, env.clone())),
            Expr::AndAlso(l, r) => {
                if self.eval_bool(l, env)? {
                    Ok(Value::Bool(self.eval_bool(r, env)?))
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Expr::OrElse(l, r) => {
                if self.eval_bool(l, env)? {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(self.eval_bool(r, env)?))
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval_in(left, env)?;
                let r = self.eval_in(right, env)?;
                binary(*op, l, r)
            }
            Expr::From(q) => {
                let mut rows = Vec::new();
                let is_bag = self.run_query(q, env, &mut |row| {
                    rows.push(row);
                    Ok(true)
                })?;
                Ok(if is_bag { Value::Bag(rows) } else { Value::List(rows) })
            }
            Expr::Exists(q) => {
                let mut found = false;
                self.run_query(q, env, &mut |_| {
                    found = true;
                    Ok(false)
                })?;
                Ok(Value::Bool(found))
            }
        }
    }

    fn eval_all(&self, items: &[Expr], env: &Env) -> EvalResult<Vec<Value>> {
        items.iter().map(|e| self.eval_in(e, env)).collect()
    }

    fn eval_bool(&self, expr: &Expr, env: &Env) -> EvalResult<bool> {
        match self.eval_in(expr, env)? {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }

    fn lookup(&self, name: &str, env: &Env) -> EvalResult<Value> {
        if let Some(v) = env.lookup(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if let Some(b) = Builtin::lookup(name) {
            return Ok(Value::Builtin(b, Vec::new()));
        }
        Err(EvalError::Unbound { name: name.to_string() })
    }

    pub fn apply(&self, f: Value, arg: Value) -> EvalResult<Value> {
        match f {
            Value::Closure(c) => {
                let depth = self.depth.get();
                if depth >= self.config.max_depth {
                    return Err(EvalError::DepthExceeded {
                        limit: self.config.max_depth,
                    });
                }
                let env = arg.bind(&c.param, &c.env).ok_or_else(|| EvalError::MatchFailure {
                    pat: c.param.to_string(),
                    value: arg.to_string(),
                })?;
                self.depth.set(depth + 1);
                let out = self.eval_in(&c.body, &env);
                self.depth.set(depth);
                out
            }
            Value::Builtin(b, mut args) => {
                args.push(arg);
                if args.len() < b.arity() {
                    return Ok(Value::Builtin(b, args));
                }
                self.call_builtin(b, args)
            }
            other => Err(mismatch("function", &other)),
        }
    }

    fn call_builtin(&self, b: Builtin, mut args: Vec<Value>) -> EvalResult<Value> {
        match b {
            Builtin::Not => match args.pop() {
                Some(Value::Bool(v)) => Ok(Value::Bool(!v)),
                Some(other) => Err(mismatch("bool", &other)),
                None => Err(EvalError::TypeMismatch {
                    expected: "bool",
                    found: "nothing".into(),
                }),
            },
            Builtin::ListIterate | Builtin::BagIterate => {
                let step = args.pop();
                let base = args.pop();
                match (base, step) {
                    (Some(base), Some(step)) => self.iterate(b, base, step),
                    _ => Err(EvalError::TypeMismatch {
                        expected: "base and step",
                        found: "missing arguments".into(),
                    }),
                }
            }
        }
    }

    /// Semi-naive fixpoint: `step (old, new)` is applied to the accumulated
    /// rows and the latest increment until an increment adds nothing.
    fn iterate(&self, b: Builtin, base: Value, step: Value) -> EvalResult<Value> {
        let bag = match (b, &base) {
            (Builtin::ListIterate, Value::List(_)) => false,
            (Builtin::BagIterate, Value::Bag(_)) => true,
            _ => {
                return Err(EvalError::OverloadMismatch {
                    builtin: b.name(),
                    found: base.kind_name(),
                })
            }
        };
        let wrap = |rows: Vec<Value>| if bag { Value::Bag(rows) } else { Value::List(rows) };

        let mut acc: Vec<Value> = Vec::new();
        for row in base.into_elements().unwrap_or_default() {
            if !acc.contains(&row) {
                acc.push(row);
            }
        }
        let mut delta = acc.clone();
        let mut round = 0usize;
        while !delta.is_empty() {
            round += 1;
            let out = self.apply(
                step.clone(),
                Value::Tuple(vec![wrap(acc.clone()), wrap(delta.clone())]),
            )?;
            let rows = match out {
                Value::List(rows) | Value::Bag(rows) => rows,
                other => return Err(mismatch("collection", &other)),
            };
            let mut next = Vec::new();
            for row in rows {
                if !acc.contains(&row) && !next.contains(&row) {
                    next.push(row);
                }
            }
            trace!(builtin = b.name(), round, new_rows = next.len(), "fixpoint round");
            acc.extend(next.iter().cloned());
            delta = next;
        }
        Ok(wrap(acc))
    }

    // ------------------------------------------------------------------------
    // Comprehensions
    // ------------------------------------------------------------------------

    /// Feed each output row of `query` to `sink` until it returns `false`.
    /// Returns whether any scanned source was a bag.
    fn run_query(
        &self,
        query: &Query,
        env: &Env,
        sink: &mut dyn FnMut(Value) -> EvalResult<bool>,
    ) -> EvalResult<bool> {
        let mut run = QueryRun {
            query,
            sink,
            is_bag: false,
            matched: Vec::with_capacity(query.scans.len()),
        };
        self.scan_from(&mut run, 0, env)?;
        Ok(run.is_bag)
    }

    fn scan_from(&self, run: &mut QueryRun<'_>, i: usize, env: &Env) -> EvalResult<bool> {
        let query = run.query;
        let Some(scan) = query.scans.get(i) else {
            return self.emit_row(run, env);
        };
        let candidates = match &scan.source {
            Some(source) => match self.eval_in(source, env)? {
                Value::List(rows) => rows,
                Value::Bag(rows) => {
                    run.is_bag = true;
                    rows
                }
                other => return Err(mismatch("collection", &other)),
            },
            None => self.enumerate(&scan.pat)?,
        };
        for value in candidates {
            let Some(inner) = value.bind(&scan.pat, env) else {
                continue;
            };
            run.matched.push(value);
            let more = self.scan_from(run, i + 1, &inner)?;
            run.matched.pop();
            if !more {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn emit_row(&self, run: &mut QueryRun<'_>, env: &Env) -> EvalResult<bool> {
        let query = run.query;
        let mut output = None;
        for step in &query.steps {
            match step {
                Step::Where(cond) => {
                    if !self.eval_bool(cond, env)? {
                        return Ok(true);
                    }
                }
                Step::Yield(e) => output = Some(self.eval_in(e, env)?),
            }
        }
        let row = match output {
            Some(v) => v,
            None if run.matched.len() == 1 => run.matched[0].clone(),
            None => Value::Tuple(run.matched.clone()),
        };
        (run.sink)(row)
    }

    /// Candidate values for a sourceless scan, drawn from the configured extent.
    fn enumerate(&self, pat: &Pat) -> EvalResult<Vec<Value>> {
        match pat {
            Pat::Literal(lit) => Ok(vec![Value::from_literal(lit)]),
            Pat::Wildcard | Pat::Var(_) => match &self.config.extent {
                Some(extent) => Ok(extent.clone()),
                None => Err(EvalError::UnboundedScan { pat: pat.to_string() }),
            },
            Pat::Tuple(items) => {
                let mut rows: Vec<Vec<Value>> = vec![Vec::new()];
                for item in items {
                    let column = self.enumerate(item)?;
                    rows = rows
                        .into_iter()
                        .flat_map(|prefix| {
                            column.iter().map(move |v| {
                                let mut row = prefix.clone();
                                row.push(v.clone());
                                row
                            })
                        })
                        .collect();
                }
                Ok(rows.into_iter().map(Value::Tuple).collect())
            }
        }
    }
}

struct QueryRun<'a> {
    query: &'a Query,
    sink: &'a mut dyn FnMut(Value) -> EvalResult<bool>,
    is_bag: bool,
    matched: Vec<Value>,
}

// ============================================================================
// Helpers
// ============================================================================

fn closure(param: &Pat, body: &Expr, env: Env) -> Value {
    Value::Closure(Rc::new(Closure {
        param: param.clone(),
        body: body.clone(),
        env,
    }))
}

fn mismatch(expected: &'static str, found: &Value) -> EvalError {
    EvalError::TypeMismatch {
        expected,
        found: found.kind_name().to_string(),
    }
}

/// A list bound to a `val` declared as a bag becomes a bag.
fn coerce(value: Value, ty: Option<&Type>) -> Value {
    match (value, ty) {
        (Value::List(rows), Some(Type::Bag(_))) => Value::Bag(rows),
        (v, _) => v,
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> EvalResult<Value> {
    match op {
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                (Value::Int(_), other) | (Value::Str(_), other) => return Err(mismatch(l.kind_name(), other)),
                (other, _) => return Err(mismatch("int or string", other)),
            };
            Ok(Value::Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinOp::Elem => match r.elements() {
            Some(rows) => Ok(Value::Bool(rows.contains(&l))),
            None => Err(mismatch("collection", &r)),
        },
        BinOp::Append => {
            let bag = l.is_bag() || r.is_bag();
            match (l, r) {
                (l @ (Value::List(_) | Value::Bag(_)), r @ (Value::List(_) | Value::Bag(_))) => {
                    let mut rows = l.into_elements().unwrap_or_default();
                    rows.extend(r.into_elements().unwrap_or_default());
                    Ok(if bag { Value::Bag(rows) } else { Value::List(rows) })
                }
                (Value::List(_) | Value::Bag(_), other) | (other, _) => Err(mismatch("collection", &other)),
            }
        }
        BinOp::Add | BinOp::Sub => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => {
                let out = if op == BinOp::Add { a.checked_add(*b) } else { a.checked_sub(*b) };
                out.map(Value::Int).ok_or(EvalError::Overflow)
            }
            (Value::Int(_), other) | (other, _) => Err(mismatch("int", other)),
        },
    }
}
