//! Variable environments: a case-insensitive scope chain
//!
//! Globals ⊃ module scope ⊃ procedure scope ⊃ with-block scope (spec §3).
//! Lookups walk inner-to-outer; writes to an undeclared name create a cell
//! in module scope, matching VBA's behavior when `Option Explicit` is absent.

use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Case-folds an identifier the way VBA compares names: ASCII lowercase
pub fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

type Cell = Rc<RefCell<Value>>;

/// A single lexical scope: a case-folded-name -> cell mapping plus a parent link
#[derive(Debug, Default)]
pub struct Scope {
    bindings: RefCell<HashMap<String, Cell>>,
}

impl Scope {
    pub fn new() -> Rc<Self> {
        Rc::new(Scope::default())
    }

    /// Declares (or re-declares) a cell in *this* scope only
    pub fn declare(&self, name: &str, value: Value) -> Cell {
        let cell = Rc::new(RefCell::new(value));
        self.bindings
            .borrow_mut()
            .insert(fold(name), cell.clone());
        cell
    }

    fn get_local(&self, name: &str) -> Option<Cell> {
        self.bindings.borrow().get(&fold(name)).cloned()
    }

    fn contains_local(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(&fold(name))
    }
}

/// The scope chain active at a given point of execution: with-block(s),
/// procedure scope, module scope, globals — checked in that order
pub struct EnvChain {
    pub globals: Rc<Scope>,
    pub module: Rc<Scope>,
    /// Procedure call frames, innermost last
    pub frames: Vec<Rc<Scope>>,
    /// `With` target stack; each entry is the evaluated with-expression
    pub with_stack: Vec<Value>,
}

impl EnvChain {
    pub fn new(globals: Rc<Scope>, module: Rc<Scope>) -> Self {
        EnvChain {
            globals,
            module,
            frames: Vec::new(),
            with_stack: Vec::new(),
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Scope::new());
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn push_with(&mut self, target: Value) {
        self.with_stack.push(target);
    }

    pub fn pop_with(&mut self) {
        self.with_stack.pop();
    }

    /// Current `With`-block target, if any
    pub fn with_target(&self) -> Option<&Value> {
        self.with_stack.last()
    }

    fn scopes_innermost_first(&self) -> impl Iterator<Item = &Rc<Scope>> {
        self.frames.iter().rev().chain(std::iter::once(&self.module))
    }

    /// `get(name) -> Option<cell>` walking inner -> outer, per spec §4.D
    pub fn get(&self, name: &str) -> Option<Cell> {
        for scope in self.scopes_innermost_first() {
            if let Some(c) = scope.get_local(name) {
                return Some(c);
            }
        }
        self.globals.get_local(name)
    }

    /// `set(name, value, scope_hint)`: assigns to the existing cell if one
    /// is visible, otherwise declares a new one in **module** scope — the
    /// VBA default when `Option Explicit` is absent (spec §3).
    pub fn set(&self, name: &str, value: Value) -> Cell {
        if let Some(cell) = self.get(name) {
            *cell.borrow_mut() = value;
            cell
        } else {
            self.module.declare(name, value)
        }
    }

    /// Declares a new binding explicitly in module scope (used for `Dim` at
    /// module level and undeclared-write fallback per spec §3)
    pub fn declare_module(&self, name: &str, value: Value) -> Cell {
        self.module.declare(name, value)
    }

    /// Declares in the current (innermost) procedure frame, or module scope
    /// if there is no active frame — used for an explicit `Dim` inside a
    /// procedure body.
    pub fn declare_local(&self, name: &str, value: Value) -> Cell {
        self.frames
            .last()
            .unwrap_or(&self.module)
            .declare(name, value)
    }

    pub fn declared_anywhere(&self, name: &str) -> bool {
        self.scopes_innermost_first()
            .any(|s| s.contains_local(name))
            || self.globals.contains_local(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup() {
        let globals = Scope::new();
        let module = Scope::new();
        let mut env = EnvChain::new(globals, module);
        env.set("Foo", Value::Int(1));
        assert!(env.get("foo").is_some());
        assert!(env.get("FOO").is_some());
        assert!(env.get("fOo").is_some());
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let globals = Scope::new();
        let module = Scope::new();
        let mut env = EnvChain::new(globals, module);
        env.declare_module("x", Value::Int(1));
        env.push_frame();
        env.declare_local("x", Value::Int(2));
        match env.get("x").unwrap().borrow().clone() {
            Value::Int(n) => assert_eq!(n, 2),
            _ => panic!("expected shadowed Int"),
        }
        env.pop_frame();
        match env.get("x").unwrap().borrow().clone() {
            Value::Int(n) => assert_eq!(n, 1),
            _ => panic!("expected outer Int"),
        }
    }

    #[test]
    fn undeclared_write_lands_in_module_scope() {
        let globals = Scope::new();
        let module = Scope::new();
        let mut env = EnvChain::new(globals, module);
        env.push_frame();
        env.set("y", Value::Int(5));
        assert!(env.module.contains_local("y"));
    }
}
