//! Name-keyed set of action handlers

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::Tool;

/// Handlers an executor can dispatch to.
///
/// Each agent owns its own registry; there is no process-wide default.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; a later one with the same name wins
    pub fn with<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.handlers.insert(tool.name().to_string(), Arc::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Function-calling schemas, ordered by name
    pub fn schemas(&self) -> Vec<Value> {
        self.handlers
            .values()
            .map(|tool| tool.to_definition().to_value())
            .collect()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
