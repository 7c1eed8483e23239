//! Projection engine: named read models folded from selected event types.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use eventide_core::aggregate::merge_into;
use eventide_core::clock::Clock;
use eventide_core::error::EventStoreError;
use eventide_core::event::{DomainEvent, EventData, StreamKey};
use eventide_core::repository::EventRepository;
use eventide_core::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::log::EventLog;
use crate::query::EventQuery;

/// Definition of a projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Unique projection name.
    pub name: String,
    /// Event types folded into the read models; others are ignored.
    pub event_types: HashSet<String>,
    /// Seed read models from stream snapshots when rebuilding. Only streams
    /// with retained events of a declared type are seeded, and only with the
    /// snapshot fields those events write.
    pub build_from_snapshot: bool,
    /// Rebuild from history as soon as the projection is created.
    pub rebuild_on_start: bool,
    /// Events replayed between yields during a rebuild.
    pub batch_size: usize,
    /// Updates between persisted checkpoints.
    pub checkpoint_frequency: u64,
}

impl ProjectionConfig {
    /// A projection over `event_types` with default tuning.
    pub fn new<I, S>(name: impl Into<String>, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            event_types: event_types.into_iter().map(Into::into).collect(),
            build_from_snapshot: false,
            rebuild_on_start: false,
            batch_size: 100,
            checkpoint_frequency: 10,
        }
    }

    /// Sets `rebuild_on_start`.
    #[must_use]
    pub fn rebuild_on_start(mut self, enabled: bool) -> Self {
        self.rebuild_on_start = enabled;
        self
    }

    /// Sets `build_from_snapshot`.
    #[must_use]
    pub fn build_from_snapshot(mut self, enabled: bool) -> Self {
        self.build_from_snapshot = enabled;
        self
    }

    /// Sets the checkpoint frequency.
    #[must_use]
    pub fn checkpoint_frequency(mut self, frequency: u64) -> Self {
        self.checkpoint_frequency = frequency;
        self
    }

    fn validate(&self) -> Result<(), EventStoreError> {
        if self.name.trim().is_empty() {
            return Err(EventStoreError::Validation("projection name must not be empty".into()));
        }
        if self.batch_size == 0 || self.checkpoint_frequency == 0 {
            return Err(EventStoreError::Validation(format!(
                "projection {}: batch_size and checkpoint_frequency must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// A materialized view of one aggregate inside a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadModel {
    /// Aggregate id the model is keyed by.
    pub id: String,
    /// Aggregate version of the last folded event.
    pub version: i64,
    /// Folded data.
    pub data: EventData,
    /// Time of the last update.
    pub last_updated: DateTime<Utc>,
    /// Number of updates applied to this model.
    pub projection_version: u64,
}

/// Checkpoint bookkeeping of a projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProjectionStatus {
    /// Aggregate version of the last processed event.
    pub checkpoint: i64,
    /// Last checkpoint written to durable storage.
    pub persisted_checkpoint: i64,
    /// Updates since the last persisted checkpoint.
    pub updates_since_checkpoint: u64,
    /// Number of read models.
    pub read_models: usize,
}

#[derive(Debug)]
struct Projection {
    config: ProjectionConfig,
    read_models: BTreeMap<String, ReadModel>,
    /// Last folded version per stream. Read models are keyed by aggregate id
    /// alone, so streams of different types can share one model.
    folded: HashMap<StreamKey, i64>,
    checkpoint: i64,
    persisted_checkpoint: i64,
    updates_since_checkpoint: u64,
}

impl Projection {
    fn new(config: ProjectionConfig) -> Self {
        Self {
            config,
            read_models: BTreeMap::new(),
            folded: HashMap::new(),
            checkpoint: 0,
            persisted_checkpoint: 0,
            updates_since_checkpoint: 0,
        }
    }

    fn clear(&mut self) {
        self.read_models.clear();
        self.folded.clear();
        self.checkpoint = 0;
        self.persisted_checkpoint = 0;
        self.updates_since_checkpoint = 0;
    }

    /// Folds one event. Returns a checkpoint to persist when one is due.
    fn apply(&mut self, event: &DomainEvent, now: DateTime<Utc>) -> Option<i64> {
        if !self.config.event_types.contains(&event.event_type) {
            return None;
        }
        let key = event.stream_key();
        // Redelivered or already covered by a seeding snapshot.
        if self
            .folded
            .get(&key)
            .is_some_and(|folded| *folded >= event.aggregate_version)
        {
            return None;
        }
        self.folded.insert(key, event.aggregate_version);
        let model = self.model_mut(&event.aggregate_id, now);
        merge_into(&mut model.data, &event.data);
        model.version = event.aggregate_version;
        model.last_updated = now;
        model.projection_version += 1;

        self.checkpoint = event.aggregate_version;
        self.updates_since_checkpoint += 1;
        if self.updates_since_checkpoint >= self.config.checkpoint_frequency {
            self.updates_since_checkpoint = 0;
            self.persisted_checkpoint = self.checkpoint;
            return Some(self.checkpoint);
        }
        None
    }

    fn model_mut(&mut self, aggregate_id: &str, now: DateTime<Utc>) -> &mut ReadModel {
        self.read_models
            .entry(aggregate_id.to_owned())
            .or_insert_with(|| ReadModel {
                id: aggregate_id.to_owned(),
                version: 0,
                data: EventData::new(),
                last_updated: now,
                projection_version: 0,
            })
    }

    /// Seeds the model of `snapshot`'s aggregate with the snapshot values of
    /// `fields`. Events of that stream up to the snapshot version are then
    /// skipped.
    fn seed(&mut self, snapshot: &Snapshot, fields: &HashSet<String>, now: DateTime<Utc>) {
        let data: EventData = snapshot
            .data
            .iter()
            .filter(|(field, _)| fields.contains(*field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        self.folded.insert(snapshot.stream_key(), snapshot.version);
        let model = self.model_mut(&snapshot.aggregate_id, now);
        merge_into(&mut model.data, &data);
        model.version = model.version.max(snapshot.version);
        model.projection_version += 1;
    }

    fn status(&self) -> ProjectionStatus {
        ProjectionStatus {
            checkpoint: self.checkpoint,
            persisted_checkpoint: self.persisted_checkpoint,
            updates_since_checkpoint: self.updates_since_checkpoint,
            read_models: self.read_models.len(),
        }
    }
}

/// Owns every projection and its read models.
pub struct ProjectionEngine {
    projections: RwLock<HashMap<String, Projection>>,
    repository: Option<Arc<dyn EventRepository>>,
    clock: Arc<dyn Clock>,
}

impl ProjectionEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(repository: Option<Arc<dyn EventRepository>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            projections: RwLock::new(HashMap::new()),
            repository,
            clock,
        }
    }

    /// Registers a projection.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::ProjectionExists` for a duplicate name and
    /// `EventStoreError::Validation` for an invalid config.
    pub async fn create(&self, config: ProjectionConfig) -> Result<(), EventStoreError> {
        config.validate()?;
        let mut projections = self.projections.write().await;
        if projections.contains_key(&config.name) {
            return Err(EventStoreError::ProjectionExists(config.name));
        }
        info!(projection = %config.name, event_types = ?config.event_types, "projection created");
        projections.insert(config.name.clone(), Projection::new(config));
        Ok(())
    }

    /// Removes a projection and its read models.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::ProjectionNotFound` for an unknown name.
    pub async fn remove(&self, name: &str) -> Result<(), EventStoreError> {
        self.projections
            .write()
            .await
            .remove(name)
            .map(|_| info!(projection = %name, "projection removed"))
            .ok_or_else(|| EventStoreError::ProjectionNotFound(name.to_owned()))
    }

    /// Config of a projection.
    pub async fn config(&self, name: &str) -> Option<ProjectionConfig> {
        self.projections
            .read()
            .await
            .get(name)
            .map(|projection| projection.config.clone())
    }

    /// Checkpoint bookkeeping of a projection.
    pub async fn status(&self, name: &str) -> Option<ProjectionStatus> {
        self.projections.read().await.get(name).map(Projection::status)
    }

    /// Number of projections.
    pub async fn count(&self) -> usize {
        self.projections.read().await.len()
    }

    /// Folds `event` into every projection that declares its type.
    pub async fn process_event(&self, event: &DomainEvent) {
        let now = self.clock.now();
        let due: Vec<(String, i64)> = {
            let mut projections = self.projections.write().await;
            projections
                .values_mut()
                .filter_map(|projection| {
                    projection
                        .apply(event, now)
                        .map(|checkpoint| (projection.config.name.clone(), checkpoint))
                })
                .collect()
        };
        for (name, checkpoint) in due {
            self.persist_checkpoint(&name, checkpoint).await;
        }
    }

    /// Clears `name` and replays the retained history of its event types on
    /// top of the optional snapshot seeds, yielding every `batch_size` events.
    /// History is read after the projection lock is taken, so an event the
    /// live path applied earlier is part of the replay.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::ProjectionNotFound` for an unknown name.
    pub async fn rebuild(
        &self,
        name: &str,
        seeds: &[Snapshot],
        log: &EventLog,
    ) -> Result<ProjectionStatus, EventStoreError> {
        let mut projections = self.projections.write().await;
        let projection = projections
            .get_mut(name)
            .ok_or_else(|| EventStoreError::ProjectionNotFound(name.to_owned()))?;
        projection.clear();
        let history = log
            .query(&EventQuery::all().event_types(projection.config.event_types.iter().cloned()))
            .await;

        let now = self.clock.now();
        if projection.config.build_from_snapshot {
            let mut declared_fields: HashMap<StreamKey, HashSet<String>> = HashMap::new();
            for event in &history {
                declared_fields
                    .entry(event.stream_key())
                    .or_default()
                    .extend(event.data.keys().cloned());
            }
            for snapshot in seeds {
                if let Some(fields) = declared_fields.get(&snapshot.stream_key()) {
                    projection.seed(snapshot, fields, now);
                }
            }
        }

        let batch_size = projection.config.batch_size;
        for batch in history.chunks(batch_size) {
            for event in batch {
                // Checkpoints written during a rebuild are superseded by the
                // final one below.
                let _ = projection.apply(event, now);
            }
            tokio::task::yield_now().await;
        }
        projection.updates_since_checkpoint = 0;
        projection.persisted_checkpoint = projection.checkpoint;
        let status = projection.status();
        drop(projections);

        self.persist_checkpoint(name, status.checkpoint).await;
        info!(
            projection = %name,
            replayed = history.len(),
            read_models = status.read_models,
            "projection rebuilt"
        );
        Ok(status)
    }

    /// One read model.
    pub async fn read_model(&self, name: &str, id: &str) -> Option<ReadModel> {
        self.projections
            .read()
            .await
            .get(name)
            .and_then(|projection| projection.read_models.get(id).cloned())
    }

    /// Read models whose data contains every key/value pair of `predicate`.
    /// Unknown projections yield no matches.
    pub async fn query(&self, name: &str, predicate: &EventData) -> Vec<ReadModel> {
        self.projections
            .read()
            .await
            .get(name)
            .map(|projection| {
                projection
                    .read_models
                    .values()
                    .filter(|model| {
                        predicate
                            .iter()
                            .all(|(key, value)| model.data.get(key) == Some(value))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn persist_checkpoint(&self, name: &str, checkpoint: i64) {
        let Some(repository) = &self.repository else {
            debug!(projection = %name, checkpoint, "checkpoint reached");
            return;
        };
        if let Err(e) = repository.save_checkpoint(name, checkpoint).await {
            warn!(projection = %name, checkpoint, error = %e, "checkpoint persistence failed");
        }
    }
}

impl std::fmt::Debug for ProjectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use eventide_core::event::{EventMetadata, to_event_data};
    use eventide_test_support::FixedClock;
    use serde_json::json;
    use uuid::Uuid;

    fn engine() -> ProjectionEngine {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        ProjectionEngine::new(None, Arc::new(clock))
    }

    fn event(aggregate_id: &str, event_type: &str, version: i64, data: serde_json::Value) -> DomainEvent {
        DomainEvent {
            id: Uuid::new_v4(),
            event_type: event_type.to_owned(),
            aggregate_id: aggregate_id.to_owned(),
            aggregate_type: "user".to_owned(),
            aggregate_version: version,
            timestamp: Utc::now(),
            data: to_event_data(data),
            metadata: EventMetadata::default(),
            caused_by: None,
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn test_process_event_ignores_undeclared_types() {
        // Arrange
        let engine = engine();
        engine
            .create(ProjectionConfig::new("users", ["UserRegistered"]))
            .await
            .unwrap();

        // Act
        engine
            .process_event(&event("u-1", "UserDeleted", 1, json!({"deleted": true})))
            .await;

        // Assert
        assert!(engine.read_model("users", "u-1").await.is_none());
    }

    #[tokio::test]
    async fn test_process_event_merges_and_bumps_projection_version() {
        // Arrange
        let engine = engine();
        engine
            .create(ProjectionConfig::new("users", ["UserRegistered", "EmailChanged"]))
            .await
            .unwrap();

        // Act
        engine
            .process_event(&event("u-1", "UserRegistered", 1, json!({"email": "a@x.io", "plan": "free"})))
            .await;
        engine
            .process_event(&event("u-1", "EmailChanged", 2, json!({"email": "b@x.io"})))
            .await;

        // Assert
        let model = engine.read_model("users", "u-1").await.unwrap();
        assert_eq!(model.data["email"], "b@x.io");
        assert_eq!(model.data["plan"], "free");
        assert_eq!(model.version, 2);
        assert_eq!(model.projection_version, 2);
        assert_eq!(engine.status("users").await.unwrap().checkpoint, 2);
    }

    #[tokio::test]
    async fn test_process_event_skips_redelivered_versions() {
        let engine = engine();
        engine
            .create(ProjectionConfig::new("users", ["UserRegistered"]))
            .await
            .unwrap();
        let registered = event("u-1", "UserRegistered", 1, json!({"email": "a@x.io"}));

        engine.process_event(&registered).await;
        engine.process_event(&registered).await;

        assert_eq!(
            engine.read_model("users", "u-1").await.unwrap().projection_version,
            1
        );
    }

    #[tokio::test]
    async fn test_redelivery_check_is_per_stream() {
        // Arrange
        let engine = engine();
        engine
            .create(ProjectionConfig::new("activity", ["Touched"]))
            .await
            .unwrap();
        let order_event = DomainEvent {
            aggregate_type: "order".to_owned(),
            ..event("x-1", "Touched", 1, json!({"order_field": 2}))
        };

        // Act
        engine
            .process_event(&event("x-1", "Touched", 1, json!({"user_field": 1})))
            .await;
        engine.process_event(&order_event).await;
        engine.process_event(&order_event).await;

        // Assert
        let model = engine.read_model("activity", "x-1").await.unwrap();
        assert_eq!(model.data["user_field"], 1);
        assert_eq!(model.data["order_field"], 2);
        assert_eq!(model.projection_version, 2);
    }

    #[tokio::test]
    async fn test_query_matches_every_predicate_pair() {
        // Arrange
        let engine = engine();
        engine
            .create(ProjectionConfig::new("users", ["UserRegistered"]))
            .await
            .unwrap();
        for (id, plan, country) in [("u-1", "pro", "NL"), ("u-2", "pro", "US"), ("u-3", "free", "NL")] {
            engine
                .process_event(&event(id, "UserRegistered", 1, json!({"plan": plan, "country": country})))
                .await;
        }

        // Act
        let matches = engine
            .query("users", &to_event_data(json!({"plan": "pro", "country": "NL"})))
            .await;

        // Assert
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "u-1");
        assert!(engine.query("missing", &EventData::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_names() {
        let engine = engine();
        engine
            .create(ProjectionConfig::new("users", ["UserRegistered"]))
            .await
            .unwrap();

        let result = engine
            .create(ProjectionConfig::new("users", ["UserRegistered"]))
            .await;

        assert!(matches!(result, Err(EventStoreError::ProjectionExists(name)) if name == "users"));
    }
}
