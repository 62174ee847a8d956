//! Scoped value environment for rendering
//!
//! A stack of name-to-value scopes over a shared global scope. Lookup walks
//! innermost to outermost; child templates get a cloned context so their
//! mutations don't leak into the caller.

use crate::template::TemplateEnv;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Scope key holding the active parent-template chain during inheritance.
pub(crate) const PARENT_TEMPLATE_KEY: &str = "$$__parent_template";
/// Scope key holding the renderer of the block currently being overridden.
pub(crate) const SUPER_BLOCK_KEY: &str = "$$__super_block";

/// One frame of the scope stack.
pub type Scope = HashMap<String, Value>;

/// The value environment a render walks against.
pub struct RenderContext {
    global: Rc<RefCell<Scope>>,
    scopes: Vec<Scope>,
    env: Option<TemplateEnv>,
}

impl RenderContext {
    pub fn new(globals: Scope, env: Option<TemplateEnv>) -> Self {
        Self {
            global: Rc::new(RefCell::new(globals)),
            scopes: Vec::new(),
            env,
        }
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    pub fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Sets a name in the current (innermost) scope; with no scope entered,
    /// the global scope is the current one.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.into(), value);
            }
            None => {
                self.global.borrow_mut().insert(name.into(), value);
            }
        }
    }

    /// Removes a name from the current scope, returning the previous value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        match self.scopes.last_mut() {
            Some(scope) => scope.remove(name),
            None => self.global.borrow_mut().remove(name),
        }
    }

    /// Whether the current scope itself (not an outer one) binds `name`.
    pub fn current_scope_has(&self, name: &str) -> bool {
        match self.scopes.last() {
            Some(scope) => scope.contains_key(name),
            None => self.global.borrow().contains_key(name),
        }
    }

    /// Innermost-to-outermost lookup ending at the global scope. Values are
    /// returned by clone; list and map values share storage by handle.
    pub fn find_value(&self, name: &str) -> Option<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Some(value.clone());
            }
        }
        self.global.borrow().get(name).cloned()
    }

    /// Runs `f` against the global scope.
    pub fn with_global<R>(&mut self, f: impl FnOnce(&mut Scope) -> R) -> R {
        f(&mut self.global.borrow_mut())
    }

    /// New context sharing this one's global scope. With `inherit_current`
    /// the current scope is snapshotted as the clone's only scope.
    pub fn clone_context(&self, inherit_current: bool) -> RenderContext {
        let scopes = if inherit_current {
            match self.scopes.last() {
                Some(scope) => vec![scope.clone()],
                None => vec![Scope::new()],
            }
        } else {
            Vec::new()
        };
        RenderContext {
            global: Rc::clone(&self.global),
            scopes,
            env: self.env.clone(),
        }
    }

    pub fn env(&self) -> Option<&TemplateEnv> {
        self.env.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_walks_scopes_inner_first() {
        let mut globals = Scope::new();
        globals.insert("x".to_string(), Value::Int(1));
        let mut ctx = RenderContext::new(globals, None);

        ctx.enter_scope();
        ctx.set("x", Value::Int(2));
        assert!(matches!(ctx.find_value("x"), Some(Value::Int(2))));
        ctx.exit_scope();
        assert!(matches!(ctx.find_value("x"), Some(Value::Int(1))));
    }

    #[test]
    fn test_set_targets_current_scope() {
        let mut ctx = RenderContext::new(Scope::new(), None);
        ctx.enter_scope();
        ctx.set("y", Value::Int(5));
        ctx.enter_scope();
        assert!(matches!(ctx.find_value("y"), Some(Value::Int(5))));
        assert!(!ctx.current_scope_has("y"));
        ctx.exit_scope();
        ctx.exit_scope();
        assert!(ctx.find_value("y").is_none());
    }

    #[test]
    fn test_clone_shares_global() {
        let mut ctx = RenderContext::new(Scope::new(), None);
        let mut clone = ctx.clone_context(false);
        clone.set("g", Value::Int(9));
        assert!(matches!(ctx.find_value("g"), Some(Value::Int(9))));
        ctx.enter_scope();
        ctx.set("local", Value::Int(1));
        let clone = ctx.clone_context(false);
        assert!(clone.find_value("local").is_none());
    }

    #[test]
    fn test_clone_inherits_current_scope() {
        let mut ctx = RenderContext::new(Scope::new(), None);
        ctx.enter_scope();
        ctx.set("local", Value::Int(1));
        let clone = ctx.clone_context(true);
        assert!(matches!(clone.find_value("local"), Some(Value::Int(1))));
    }
}
