use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use linked_hash_map::LinkedHashMap;

use crate::evaluator::RuntimeError;
use crate::value::Value;

/// A lexical scope. Scopes form a tree rooted at the global environment;
/// cloning an `Environment` clones the handle, not the bindings.
#[derive(Clone)]
pub struct Environment {
    env: Rc<RefCell<EnvironmentContent>>,
}

struct EnvironmentContent {
    parent: Option<Environment>,
    bindings: HashMap<String, Value>,
    constants: HashSet<String>,
    /// Present only on a module's root scope (and the program root).
    exports: Option<LinkedHashMap<String, Value>>,
}

impl Environment {
    /// Creates a root environment with no parent.
    pub fn new() -> Environment {
        Environment {
            env: Rc::new(RefCell::new(EnvironmentContent {
                parent: None,
                bindings: HashMap::new(),
                constants: HashSet::new(),
                exports: None,
            })),
        }
    }

    /// Creates a child scope of this environment.
    pub fn child(&self) -> Environment {
        Environment {
            env: Rc::new(RefCell::new(EnvironmentContent {
                parent: Some(self.clone()),
                bindings: HashMap::new(),
                constants: HashSet::new(),
                exports: None,
            })),
        }
    }

    /// Creates a module root scope: a child that owns an export table.
    pub fn module_scope(&self) -> Environment {
        let scope = self.child();
        scope.env.borrow_mut().exports = Some(LinkedHashMap::new());
        scope
    }

    pub fn same_as(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.env, &other.env)
    }

    /// Declares a new binding in this scope. Redeclaring a name already
    /// bound in this same scope is fatal.
    pub fn declare_var(
        &self,
        name: &str,
        value: Value,
        constant: bool,
    ) -> Result<(), RuntimeError> {
        let mut content = self.env.borrow_mut();
        if content.bindings.contains_key(name) {
            return Err(RuntimeError::Redeclaration(name.to_string()));
        }
        content.bindings.insert(name.to_string(), value);
        if constant {
            content.constants.insert(name.to_string());
        }
        Ok(())
    }

    /// Assigns to an existing binding, walking toward the root. Assigning to
    /// a constant or to an undeclared name is fatal.
    pub fn assign_var(&self, name: &str, value: Value) -> Result<Value, RuntimeError> {
        let owner = self
            .resolve(name)
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))?;
        let mut content = owner.env.borrow_mut();
        if content.constants.contains(name) {
            return Err(RuntimeError::ConstReassignment(name.to_string()));
        }
        content.bindings.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Looks a name up through the scope chain; unknown names are fatal.
    pub fn lookup_var(&self, name: &str) -> Result<Value, RuntimeError> {
        let owner = self
            .resolve(name)
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))?;
        let content = owner.env.borrow();
        Ok(content.bindings[name].clone())
    }

    /// Finds the scope that owns `name`, walking toward the root. First hit
    /// wins, so shadowing is lexical.
    pub fn resolve(&self, name: &str) -> Option<Environment> {
        if self.env.borrow().bindings.contains_key(name) {
            return Some(self.clone());
        }
        let parent = self.env.borrow().parent.clone();
        parent.and_then(|p| p.resolve(name))
    }

    pub fn has_own_binding(&self, name: &str) -> bool {
        self.env.borrow().bindings.contains_key(name)
    }

    pub fn has_binding(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Removes a binding, walking toward the root. Silent when absent.
    pub fn remove_var(&self, name: &str) {
        if let Some(owner) = self.resolve(name) {
            let mut content = owner.env.borrow_mut();
            content.bindings.remove(name);
            content.constants.remove(name);
        }
    }

    /// Records an export on the nearest enclosing scope that owns an export
    /// table.
    pub fn set_module_export(&self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            {
                let mut content = scope.env.borrow_mut();
                if let Some(exports) = content.exports.as_mut() {
                    exports.insert(name.to_string(), value);
                    return Ok(());
                }
            }
            current = scope.env.borrow().parent.clone();
        }
        Err(RuntimeError::ImportError(
            "'export' used outside of a module scope".to_string(),
        ))
    }

    /// The export table of this scope, if it is a module root.
    pub fn module_exports(&self) -> Option<LinkedHashMap<String, Value>> {
        self.env.borrow().exports.clone()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}
