//! Error types shared across the engine.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for event store operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict on append.
    #[error(
        "concurrency conflict on {aggregate_type}/{aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// Type of the aggregate that had the conflict.
        aggregate_type: String,
        /// The aggregate that had the conflict.
        aggregate_id: String,
        /// The version the caller expected.
        expected: i64,
        /// The version actually found.
        actual: i64,
    },

    /// A write targeted a stream that does not exist.
    #[error("stream not found: {aggregate_type}/{aggregate_id}")]
    StreamNotFound {
        /// Aggregate type of the missing stream.
        aggregate_type: String,
        /// Aggregate id of the missing stream.
        aggregate_id: String,
    },

    /// No subscription with the given id.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    /// No projection with the given name.
    #[error("projection not found: {0}")]
    ProjectionNotFound(String),

    /// A projection with the given name is already registered.
    #[error("projection already exists: {0}")]
    ProjectionExists(String),

    /// No saga with the given id.
    #[error("saga not found: {0}")]
    SagaNotFound(Uuid),

    /// Invalid input or configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// The engine has been shut down.
    #[error("event store is shut down")]
    Shutdown,
}

impl EventStoreError {
    /// Returns `true` for errors a caller can resolve by re-reading and retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Error raised by user-supplied handlers (event handlers, subscription
/// handlers, command executors reporting a step timeout).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler did not finish in time.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}
