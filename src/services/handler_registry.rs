//! Name-keyed registry of event handler factories.

use std::collections::HashMap;
use std::sync::Arc;

use super::connection_handlers::{
    ClientConnected, ClientDisconnected, ClientSubmittedCommand, ConnectionEvent, ConnectionEventHandler,
};
use super::event_handler::{EventContext, EventHandler};

/// Builds a handler instance for one event row.
pub type HandlerFactory = Arc<dyn Fn(EventContext) -> Box<dyn EventHandler> + Send + Sync>;

/// Maps event names to the factories that build their handlers.
///
/// Lookup failures are an ordinary outcome: the scheduler discards rows
/// whose name resolves to nothing.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in connection lifecycle handlers.
    pub fn with_connection_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(ClientConnected::NAME, ConnectionEventHandler::<ClientConnected>::factory);
        registry.register(ClientSubmittedCommand::NAME, ConnectionEventHandler::<ClientSubmittedCommand>::factory);
        registry.register(ClientDisconnected::NAME, ConnectionEventHandler::<ClientDisconnected>::factory);
        registry
    }

    /// Register `factory` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(EventContext) -> Box<dyn EventHandler> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(event_name = %name, "replaced existing event handler registration");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a handler for `name`, or `None` if nothing is registered.
    pub fn instantiate(&self, name: &str, context: EventContext) -> Option<Box<dyn EventHandler>> {
        self.factories.get(name).map(|factory| factory(context))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
