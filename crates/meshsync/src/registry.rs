//! Per-kind registry of configuration event handlers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::model::{Config, ConfigEvent, Event};

/// Callback invoked for every change of a kind.
pub type Handler = Arc<dyn Fn(&Config, Event) + Send + Sync>;

/// Capacity of the channel behind each [`HandlerRegistry::subscribe`] call.
const SUBSCRIBER_CAPACITY: usize = 256;

/// Ordered, append-only handler lists keyed by type name.
///
/// Dispatch is synchronous: handlers run on the dispatching thread, one after
/// another, in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for a type.
    pub fn register(&self, type_name: &str, handler: Handler) {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers
            .entry(type_name.to_string())
            .or_default()
            .push(handler);
    }

    /// Invokes every handler of the type with the event.
    pub fn dispatch(&self, type_name: &str, config: &Config, event: Event) {
        // handlers run outside the lock so they may register or dispatch themselves
        let handlers = self.handlers_for(type_name);
        log::trace!(
            "Dispatching {} for {}/{} to {} handler(s)",
            event,
            type_name,
            config.key,
            handlers.len()
        );
        for handler in handlers {
            handler(config, event);
        }
    }

    /// Number of handlers registered for a type.
    pub fn handler_count(&self, type_name: &str) -> usize {
        self.handlers_for(type_name).len()
    }

    /// Returns a receiver of owned events for a type.
    ///
    /// Slow receivers lag rather than block dispatch.
    pub fn subscribe(&self, type_name: &str) -> broadcast::Receiver<ConfigEvent> {
        let (tx, rx) = broadcast::channel(SUBSCRIBER_CAPACITY);
        self.register(
            type_name,
            Arc::new(move |config: &Config, event: Event| {
                let _ = tx.send(ConfigEvent {
                    event,
                    config: config.clone(),
                });
            }),
        );
        rx
    }

    fn handlers_for(&self, type_name: &str) -> Vec<Handler> {
        let handlers = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.get(type_name).cloned().unwrap_or_default()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let counts: HashMap<&str, usize> = handlers
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &counts)
            .finish()
    }
}
