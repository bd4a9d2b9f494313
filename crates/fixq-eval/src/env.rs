//! Persistent variable environment.

use fixq_dsl::Name;
use std::rc::Rc;

use crate::value::Value;

/// An immutable, shareable chain of bindings; `bind` never disturbs `self`.
#[derive(Debug, Clone, Default)]
pub struct Env(Option<Rc<Frame>>);

#[derive(Debug)]
struct Frame {
    name: Name,
    value: Value,
    next: Env,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, name: Name, value: Value) -> Env {
        Env(Some(Rc::new(Frame {
            name,
            value,
            next: self.clone(),
        })))
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut cur = self;
        while let Some(frame) = &cur.0 {
            if frame.name == name {
                return Some(&frame.value);
            }
            cur = &frame.next;
        }
        None
    }
}
