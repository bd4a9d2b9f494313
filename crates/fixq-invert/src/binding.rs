//! Resolution of global names.

use fixq_dsl::{Decl, Expr, Pat, Program, Type};

/// What a global name is bound to, as far as the pass can see.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Function { param: Pat, body: Expr },
    /// A value. `known` is `None` when the contents only exist at runtime.
    Value { ty: Option<Type>, known: Option<Expr> },
}

pub trait BindingLookup {
    fn lookup(&self, name: &str) -> Option<Binding>;

    /// Every name the bindings mention, reserved against fresh-name clashes.
    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

impl BindingLookup for Program {
    fn lookup(&self, name: &str) -> Option<Binding> {
        self.decl(name).map(|decl| match decl {
            Decl::Fun { param, body, .. } => Binding::Function {
                param: param.clone(),
                body: body.clone(),
            },
            Decl::Val { ty, value, .. } => Binding::Value {
                ty: ty.clone(),
                known: value.clone(),
            },
        })
    }

    fn names(&self) -> Vec<String> {
        let mut out = Vec::new();
        for decl in &self.decls {
            out.push(decl.name().to_string());
            match decl {
                Decl::Fun { param, body, .. } => {
                    out.extend(param.vars());
                    out.extend(body.all_names());
                }
                Decl::Val { value: Some(value), .. } => out.extend(value.all_names()),
                Decl::Val { value: None, .. } => {}
            }
        }
        out
    }
}

/// Runtime builtins; never variables of the program.
pub const BUILTINS: &[&str] = &["not", "List.iterate", "Bag.iterate"];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}
