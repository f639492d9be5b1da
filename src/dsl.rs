//! The semantic layer of the document-store DSL.
//!
//! [`query`] holds the pure lowering of `query { ... }` blocks into
//! comparator documents; [`DslState`] is the interpreter-wide registry of
//! the active database binding and the collection bindings, with
//! snapshot/restore for `using mongo` scopes.

pub mod query;

use std::collections::HashSet;

/// Registry of DSL bindings currently in force.
#[derive(Debug, Clone, Default)]
pub struct DslState {
    /// Name of the active database binding, if any.
    pub active_database: Option<String>,
    /// Names bound to collections via the DSL statements.
    pub collections: HashSet<String>,
}

impl DslState {
    pub fn snapshot(&self) -> DslState {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: DslState) {
        *self = snapshot;
    }

    pub fn clear(&mut self) {
        self.active_database = None;
        self.collections.clear();
    }
}
