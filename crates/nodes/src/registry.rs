//! Resolves executor ids stored on graph nodes to executor objects.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::Executable;

/// Maps executor ids to shared `Executable` implementations.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executable>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in executors
    /// (`noop`, `echo`, `sleep`, `fail`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_builtins(&mut registry);
        registry
    }

    /// Bind `id` to `executor`, replacing any previous binding.
    pub fn register(&mut self, id: impl Into<String>, executor: Arc<dyn Executable>) -> &mut Self {
        self.executors.insert(id.into(), executor);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Executable>> {
        self.executors.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.executors.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.ids())
            .finish()
    }
}
