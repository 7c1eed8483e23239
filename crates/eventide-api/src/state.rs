//! Shared application state.

use std::sync::Arc;

use eventide_engine::EventStore;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The running event store.
    pub store: Arc<EventStore>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }
}
