//! Recording handlers for fan-out and subscription tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventide_core::error::HandlerError;
use eventide_core::event::DomainEvent;
use eventide_core::handler::{EventHandler, SubscriptionHandler};

/// An event handler that records every event it receives. Optionally fails
/// every call with a fixed reason; failures are counted through `on_error`.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: Mutex<Vec<DomainEvent>>,
    failure: Option<String>,
    errors: AtomicUsize,
}

impl RecordingEventHandler {
    /// Create a handler that accepts every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handler that records, then fails every event with `reason`.
    #[must_use]
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_owned()),
            ..Self::default()
        }
    }

    /// Events received, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Types of the events received, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }

    /// Number of `on_error` callbacks.
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for RecordingEventHandler {
    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        self.events.lock().unwrap().push(event.clone());
        match &self.failure {
            Some(reason) => Err(HandlerError::failed(reason.clone())),
            None => Ok(()),
        }
    }

    fn on_error(&self, _event: &DomainEvent, _error: &HandlerError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// A subscription handler that records accepted batches and can be toggled
/// into failing.
#[derive(Debug, Default)]
pub struct RecordingSubscriptionHandler {
    batches: Mutex<Vec<Vec<Arc<DomainEvent>>>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingSubscriptionHandler {
    /// Create a handler that accepts every batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail (`true`) or succeed (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Batches accepted so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches(&self) -> Vec<Vec<Arc<DomainEvent>>> {
        self.batches.lock().unwrap().clone()
    }

    /// Every call, accepted or failed.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionHandler for RecordingSubscriptionHandler {
    async fn handle(&self, batch: &[Arc<DomainEvent>]) -> Result<(), HandlerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(HandlerError::failed("downstream unavailable"));
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}
