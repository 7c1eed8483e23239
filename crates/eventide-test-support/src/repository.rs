//! Test repositories: mock `EventRepository` implementations for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use eventide_core::error::EventStoreError;
use eventide_core::event::DomainEvent;
use eventide_core::repository::EventRepository;
use eventide_core::snapshot::Snapshot;

/// An in-memory event repository that records every write and serves them
/// back from `load_all` / `load_snapshots`. Can be seeded to test hydration.
#[derive(Debug, Default)]
pub struct RecordingEventRepository {
    events: Mutex<Vec<DomainEvent>>,
    snapshots: Mutex<Vec<Snapshot>>,
    checkpoints: Mutex<HashMap<String, i64>>,
    append_calls: Mutex<usize>,
}

impl RecordingEventRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository that already holds `events` and `snapshots`.
    #[must_use]
    pub fn seeded(events: Vec<DomainEvent>, snapshots: Vec<Snapshot>) -> Self {
        Self {
            events: Mutex::new(events),
            snapshots: Mutex::new(snapshots),
            ..Self::default()
        }
    }

    /// Returns a copy of every appended event, in append order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn appended_events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of `append_events` calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn append_calls(&self) -> usize {
        *self.append_calls.lock().unwrap()
    }

    /// Returns a copy of every saved snapshot, in save order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved_snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    /// Last checkpoint saved for `projection`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn checkpoint(&self, projection: &str) -> Option<i64> {
        self.checkpoints.lock().unwrap().get(projection).copied()
    }
}

#[async_trait]
impl EventRepository for RecordingEventRepository {
    async fn append_events(&self, events: &[DomainEvent]) -> Result<(), EventStoreError> {
        *self.append_calls.lock().unwrap() += 1;
        self.events.lock().unwrap().extend_from_slice(events);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<DomainEvent>, EventStoreError> {
        Ok(self.events.lock().unwrap().clone())
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), EventStoreError> {
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn load_snapshots(&self) -> Result<Vec<Snapshot>, EventStoreError> {
        Ok(self.snapshots.lock().unwrap().clone())
    }

    async fn save_checkpoint(&self, projection: &str, version: i64) -> Result<(), EventStoreError> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(projection.to_owned(), version);
        Ok(())
    }
}

/// An event repository that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventRepository;

#[async_trait]
impl EventRepository for FailingEventRepository {
    async fn append_events(&self, _events: &[DomainEvent]) -> Result<(), EventStoreError> {
        Err(EventStoreError::Infrastructure("connection refused".into()))
    }

    async fn load_all(&self) -> Result<Vec<DomainEvent>, EventStoreError> {
        Err(EventStoreError::Infrastructure("connection refused".into()))
    }

    async fn save_snapshot(&self, _snapshot: &Snapshot) -> Result<(), EventStoreError> {
        Err(EventStoreError::Infrastructure("connection refused".into()))
    }

    async fn load_snapshots(&self) -> Result<Vec<Snapshot>, EventStoreError> {
        Err(EventStoreError::Infrastructure("connection refused".into()))
    }

    async fn save_checkpoint(&self, _projection: &str, _version: i64) -> Result<(), EventStoreError> {
        Err(EventStoreError::Infrastructure("connection refused".into()))
    }
}
