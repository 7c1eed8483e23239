//! Type-scoped event handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use eventide_core::event::DomainEvent;
use eventide_core::handler::EventHandler;
use tokio::sync::RwLock;
use tracing::debug;

/// Registration key that receives every event type.
pub const ALL_EVENT_TYPES: &str = "*";

/// Event handlers keyed by the event type they handle.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_type` ([`ALL_EVENT_TYPES`] for every
    /// type). Handlers run in registration order.
    pub async fn register(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        debug!(event_type = %event_type, "event handler registered");
        self.handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Number of registered handlers.
    pub async fn count(&self) -> usize {
        self.handlers.read().await.values().map(Vec::len).sum()
    }

    /// Delivers `event` to every handler registered for its type, then to the
    /// wildcard handlers. A failing handler gets its own `on_error` callback
    /// and does not stop the others.
    pub async fn dispatch(&self, event: &DomainEvent) {
        let targets: Vec<Arc<dyn EventHandler>> = {
            let handlers = self.handlers.read().await;
            [event.event_type.as_str(), ALL_EVENT_TYPES]
                .iter()
                .filter_map(|key| handlers.get(*key))
                .flatten()
                .cloned()
                .collect()
        };
        for handler in targets {
            if let Err(error) = handler.handle(event).await {
                handler.on_error(event, &error);
            }
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").finish_non_exhaustive()
    }
}
