//! Durable storage contract.
//!
//! The engine keeps its working set in memory and writes through to an
//! [`EventRepository`] when one is configured. Implementations must reject
//! duplicate `(aggregate_type, aggregate_id, aggregate_version)` triples with
//! [`EventStoreError::ConcurrencyConflict`].

use async_trait::async_trait;

use crate::error::EventStoreError;
use crate::event::DomainEvent;
use crate::snapshot::Snapshot;

/// Durable append/read contract for events, snapshots and projection
/// checkpoints.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Durably append a batch of events belonging to one stream. The batch is
    /// all-or-nothing.
    async fn append_events(&self, events: &[DomainEvent]) -> Result<(), EventStoreError>;

    /// Load every stored event in global append order.
    async fn load_all(&self) -> Result<Vec<DomainEvent>, EventStoreError>;

    /// Store the active snapshot for a stream, replacing any previous one.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), EventStoreError>;

    /// Load the active snapshot of every stream.
    async fn load_snapshots(&self) -> Result<Vec<Snapshot>, EventStoreError>;

    /// Persist a projection checkpoint.
    async fn save_checkpoint(&self, projection: &str, version: i64) -> Result<(), EventStoreError>;
}
