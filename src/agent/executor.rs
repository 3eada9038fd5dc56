//! Side-effect executor boundary.
//!
//! Search, browse, email and friends are external collaborators: the host
//! registers a handler per action name, the loop dispatches by name, and the
//! core (not the handler) writes any returned output back into working
//! memory. A handler failure is information for the agent, not a crash.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AgentError;

use super::action::Action;

/// An external handler for one action name.
pub trait SideEffectExecutor: Send + Sync {
    /// The action name this handler serves ("search", "browse", ...).
    fn name(&self) -> &str;

    /// Execute the action. Any returned text is written into working memory
    /// by the core.
    fn execute(&self, action: &Action) -> Result<Option<String>, AgentError>;
}

/// Name → handler registry.
#[derive(Default)]
pub struct ExecutorRegistry {
    handlers: HashMap<String, Arc<dyn SideEffectExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn SideEffectExecutor>) {
        self.handlers.insert(executor.name().to_string(), executor);
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn SideEffectExecutor>> {
        self.handlers.get(name).cloned()
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSearch;

    impl SideEffectExecutor for EchoSearch {
        fn name(&self) -> &str {
            "search"
        }
        fn execute(&self, action: &Action) -> Result<Option<String>, AgentError> {
            match action {
                Action::Search { query } => Ok(Some(format!("results for {query}"))),
                _ => Ok(None),
            }
        }
    }

    #[test]
    fn register_and_dispatch() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(EchoSearch));
        let handler = registry.get("search").unwrap();
        let out = handler
            .execute(&Action::Search { query: "tacos".into() })
            .unwrap();
        assert_eq!(out.as_deref(), Some("results for tacos"));
        assert!(registry.get("email").is_none());
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(EchoSearch));
        assert_eq!(registry.names(), vec!["search"]);
    }
}
