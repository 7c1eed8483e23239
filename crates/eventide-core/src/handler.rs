//! Consumer contracts: type-scoped event handlers and batch subscription
//! handlers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::event::DomainEvent;

/// Handler invoked for each appended event of the type it was registered
/// for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError>;

    /// Called when [`EventHandler::handle`] fails. Failures never propagate to
    /// the appender.
    fn on_error(&self, event: &DomainEvent, error: &HandlerError) {
        tracing::warn!(
            event_id = %event.id,
            event_type = %event.event_type,
            error = %error,
            "event handler failed"
        );
    }
}

/// Handler receiving ordered batches from a subscription cursor.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    /// Handle a batch. An error leaves the cursor in place so the same batch
    /// is redelivered on the next tick.
    async fn handle(&self, batch: &[Arc<DomainEvent>]) -> Result<(), HandlerError>;
}
