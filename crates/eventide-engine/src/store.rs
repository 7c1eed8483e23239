//! The event store facade.
//!
//! [`EventStore`] is an explicitly constructed, owned engine value. It is
//! built with [`EventStoreBuilder`], optionally restored from a durable
//! repository with [`EventStore::hydrate`], started with
//! [`EventStore::start`] (background tickers) and stopped with
//! [`EventStore::shutdown`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventide_core::aggregate::{AggregateFolder, AggregateState};
use eventide_core::clock::{Clock, SystemClock};
use eventide_core::command::{Command, CommandExecutor, CommandResult};
use eventide_core::error::EventStoreError;
use eventide_core::event::{DomainEvent, EventData, NewEvent, StreamKey};
use eventide_core::handler::EventHandler;
use eventide_core::repository::EventRepository;
use eventide_core::snapshot::{Snapshot, SnapshotReason};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ConsistencyLevel, EngineConfig};
use crate::fanout::{EventBatch, FanOut, Lane};
use crate::folders::FolderRegistry;
use crate::handlers::HandlerRegistry;
use crate::log::EventLog;
use crate::metrics::{EngineMetrics, MetricsInputs, MetricsRecorder};
use crate::projection::{ProjectionConfig, ProjectionEngine, ProjectionStatus, ReadModel};
use crate::query::EventQuery;
use crate::retention::{RetentionReport, RetentionSweeper};
use crate::saga::{Saga, SagaOrchestrator, SagaStep};
use crate::snapshot::SnapshotManager;
use crate::subscription::{SubscriptionDispatcher, SubscriptionInfo, SubscriptionSpec, TickReport};

/// Folded state of one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    /// Stream identity.
    pub key: StreamKey,
    /// Version the state was folded to.
    pub version: i64,
    /// Folded state.
    pub state: AggregateState,
}

/// Executor used when the application supplies none: rejects every command.
#[derive(Debug, Clone, Copy, Default)]
struct UnconfiguredExecutor;

#[async_trait]
impl CommandExecutor for UnconfiguredExecutor {
    async fn execute(&self, command: &Command) -> Result<CommandResult, EventStoreError> {
        Ok(CommandResult::failed(format!(
            "no command executor configured for {}",
            command.command_type
        )))
    }
}

/// Builds an [`EventStore`].
pub struct EventStoreBuilder {
    config: EngineConfig,
    repository: Option<Arc<dyn EventRepository>>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn CommandExecutor>,
}

impl EventStoreBuilder {
    /// Starts from `config` with the system clock, no repository and no
    /// command executor.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            repository: None,
            clock: Arc::new(SystemClock),
            executor: Arc::new(UnconfiguredExecutor),
        }
    }

    /// Writes events, snapshots and checkpoints through `repository`.
    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn EventRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Uses `clock` for every timestamp.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Dispatches saga commands through `executor`.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Validates the configuration and spawns the fan-out consumers. Must run
    /// inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::Validation` for an invalid configuration.
    pub fn build(self) -> Result<Arc<EventStore>, EventStoreError> {
        let Self {
            config,
            repository,
            clock,
            executor,
        } = self;
        config.validate()?;

        info!(
            snapshot_frequency = config.snapshot_frequency,
            max_events_per_stream = config.max_events_per_stream,
            consistency_level = ?config.consistency_level,
            enable_compression = config.enable_compression,
            enable_encryption = config.enable_encryption,
            replication_factor = config.replication_factor,
            durable = repository.is_some(),
            "event store configured"
        );
        if config.replication_factor > 1 {
            warn!(
                replication_factor = config.replication_factor,
                "replication is delegated to the durable repository; this process keeps a single copy"
            );
        }

        let folders = Arc::new(FolderRegistry::default());
        let handlers = Arc::new(HandlerRegistry::new());
        let projections = Arc::new(ProjectionEngine::new(repository.clone(), Arc::clone(&clock)));
        let sagas = Arc::new(SagaOrchestrator::new(
            executor,
            config.default_step_timeout,
            Arc::clone(&clock),
        ));
        let fanout = FanOut::spawn(Arc::clone(&handlers), Arc::clone(&projections), Arc::clone(&sagas));
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(EventStore {
            log: EventLog::new(),
            snapshots: SnapshotManager::new(Arc::clone(&folders), repository.clone(), Arc::clone(&clock)),
            retention: RetentionSweeper::new(config.retention_policy.clone(), Arc::clone(&clock)),
            subscriptions: SubscriptionDispatcher::new(Arc::clone(&clock)),
            metrics: MetricsRecorder::new(clock.now()),
            folders,
            handlers,
            projections,
            sagas,
            fanout,
            shutdown,
            tickers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            config,
            repository,
            clock,
        }))
    }
}

impl std::fmt::Debug for EventStoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStoreBuilder")
            .field("config", &self.config)
            .field("durable", &self.repository.is_some())
            .finish_non_exhaustive()
    }
}

/// The event-sourcing engine.
pub struct EventStore {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    repository: Option<Arc<dyn EventRepository>>,
    log: EventLog,
    folders: Arc<FolderRegistry>,
    snapshots: SnapshotManager,
    retention: RetentionSweeper,
    handlers: Arc<HandlerRegistry>,
    projections: Arc<ProjectionEngine>,
    subscriptions: SubscriptionDispatcher,
    sagas: Arc<SagaOrchestrator>,
    fanout: FanOut,
    metrics: MetricsRecorder,
    shutdown: watch::Sender<bool>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl EventStore {
    /// Builder entry point.
    #[must_use]
    pub fn builder(config: EngineConfig) -> EventStoreBuilder {
        EventStoreBuilder::new(config)
    }

    /// The configuration the store was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    // ----- log -----

    /// Appends `events` to the stream `(aggregate_type, aggregate_id)`.
    ///
    /// With `expected_version` set, the append fails unless the stream is at
    /// exactly that version (`0` for a new stream). Events get consecutive
    /// versions after the current one. The batch is written to the durable
    /// repository, committed, possibly snapshotted, and then published to
    /// handlers, projections and sagas.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict` when `expected_version` is stale; nothing is
    ///   applied.
    /// - `Validation` for an empty aggregate id or type.
    /// - `Infrastructure` when the durable write fails; nothing is applied.
    /// - `Shutdown` after [`EventStore::shutdown`].
    #[instrument(
        skip(self, events),
        fields(aggregate_type = %aggregate_type, aggregate_id = %aggregate_id, count = events.len())
    )]
    pub async fn append_events(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        events: Vec<NewEvent>,
        expected_version: Option<i64>,
    ) -> Result<Vec<Arc<DomainEvent>>, EventStoreError> {
        if self.is_shut_down() {
            return Err(EventStoreError::Shutdown);
        }
        if aggregate_id.trim().is_empty() || aggregate_type.trim().is_empty() {
            return Err(EventStoreError::Validation(
                "aggregate id and type must not be empty".into(),
            ));
        }

        let key = StreamKey::new(aggregate_type, aggregate_id);
        let guard = self.log.lock_stream(&key).await;
        let current = self.log.current_version(&key).await;
        if let Some(expected) = expected_version.filter(|expected| *expected != current) {
            debug!(expected, actual = current, "append rejected by version check");
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_type: key.aggregate_type,
                aggregate_id: key.aggregate_id,
                expected,
                actual: current,
            });
        }
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let versioned: Vec<DomainEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(event, version)| DomainEvent {
                id: Uuid::new_v4(),
                event_type: event.event_type,
                aggregate_id: key.aggregate_id.clone(),
                aggregate_type: key.aggregate_type.clone(),
                aggregate_version: version,
                timestamp: now,
                data: event.data,
                metadata: event.metadata,
                caused_by: event.caused_by,
                correlation_id: event.correlation_id,
            })
            .collect();

        if let Some(repository) = &self.repository {
            repository.append_events(&versioned).await?;
        }
        let bytes: u64 = versioned.iter().map(|event| event.encoded_size() as u64).sum();
        let committed = self.log.commit(&key, versioned, now).await;
        self.metrics.record(committed.len(), bytes);
        self.snapshot_if_due(&key).await;
        drop(guard);

        let batch: EventBatch = committed.iter().cloned().collect();
        self.fanout.publish(&batch, &Lane::ALL);
        if self.config.consistency_level == ConsistencyLevel::Strong {
            self.fanout.settle().await;
        }
        debug!(
            version = committed.last().map_or(current, |event| event.aggregate_version),
            "events appended"
        );
        Ok(committed)
    }

    /// Events matching `query` from the retained global log, in append order.
    pub async fn get_events(&self, query: &EventQuery) -> Vec<Arc<DomainEvent>> {
        self.log.query(query).await
    }

    /// Folds the stream's state up to `to_version` (the current version when
    /// absent). Starts from the active snapshot when it lies within the
    /// ceiling. Returns `None` for an unknown stream, or when versions below
    /// the snapshot were purged and the ceiling needs them.
    #[instrument(skip(self))]
    pub async fn get_aggregate(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        to_version: Option<i64>,
    ) -> Option<Aggregate> {
        let key = StreamKey::new(aggregate_type, aggregate_id);
        let stream = self.log.stream(&key).await?;
        let ceiling = to_version.map_or(stream.version, |version| version.clamp(0, stream.version));

        let snapshot = match stream.snapshot {
            Some(handle) => self
                .snapshots
                .resolve(handle)
                .await
                .filter(|snapshot| snapshot.version <= ceiling),
            None => None,
        };
        let (seed, after) = snapshot.map_or_else(|| (AggregateState::new(), 0), |s| (s.data, s.version));

        let events = self.log.stream_events(&key, after, ceiling).await;
        if i64::try_from(events.len()).ok() != Some(ceiling - after) {
            debug!(stream = %key, after, ceiling, found = events.len(), "history needed for fold was purged");
            return None;
        }
        let state = self.folders.fold(&key.aggregate_type, seed, &events).await;
        Some(Aggregate {
            key,
            version: ceiling,
            state,
        })
    }

    /// Registers the fold used for `aggregate_type` by aggregates, snapshots
    /// and replay.
    pub async fn register_folder(&self, aggregate_type: impl Into<String>, folder: Arc<dyn AggregateFolder>) {
        self.folders.register(aggregate_type, folder).await;
    }

    // ----- snapshots -----

    /// Snapshots a stream at its current version on demand.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` for an unknown stream, `Infrastructure` when the
    /// snapshot cannot be encoded or stored.
    #[instrument(skip(self))]
    pub async fn create_snapshot(&self, aggregate_id: &str, aggregate_type: &str) -> Result<Snapshot, EventStoreError> {
        let key = StreamKey::new(aggregate_type, aggregate_id);
        let _guard = self.log.lock_stream(&key).await;
        self.snapshots
            .snapshot_stream(&self.log, &key, SnapshotReason::Manual)
            .await?
            .ok_or(EventStoreError::StreamNotFound {
                aggregate_type: key.aggregate_type,
                aggregate_id: key.aggregate_id,
            })
    }

    /// Active snapshot of a stream.
    pub async fn get_snapshot(&self, aggregate_id: &str, aggregate_type: &str) -> Option<Snapshot> {
        self.snapshots
            .active(&StreamKey::new(aggregate_type, aggregate_id))
            .await
    }

    fn snapshot_threshold(&self) -> usize {
        self.config
            .snapshot_frequency
            .min(self.config.max_events_per_stream.saturating_add(1))
    }

    /// Called with the stream's append lock held.
    async fn snapshot_if_due(&self, key: &StreamKey) {
        let Some(stream) = self.log.stream(key).await else {
            return;
        };
        if stream.events.len() < self.snapshot_threshold() {
            return;
        }
        if let Err(e) = self
            .snapshots
            .snapshot_stream(&self.log, key, SnapshotReason::SizeThreshold)
            .await
        {
            error!(stream = %key, error = %e, "automatic snapshot failed");
        }
    }

    /// Snapshots every stream whose retained events crossed the threshold.
    /// Returns the number of snapshots created.
    pub async fn run_snapshot_sweep(&self) -> usize {
        let mut created = 0;
        for key in self.log.streams_over(self.snapshot_threshold()).await {
            let _guard = self.log.lock_stream(&key).await;
            match self
                .snapshots
                .snapshot_stream(&self.log, &key, SnapshotReason::Periodic)
                .await
            {
                Ok(Some(_)) => created += 1,
                Ok(None) => {}
                Err(e) => error!(stream = %key, error = %e, "periodic snapshot failed"),
            }
        }
        if created > 0 {
            info!(created, "snapshot sweep completed");
        }
        created
    }

    // ----- retention -----

    /// Applies the retention policy once and moves subscription cursors past
    /// purged positions.
    pub async fn run_retention_sweep(&self) -> RetentionReport {
        let report = self.retention.sweep(&self.log).await;
        if report.deleted > 0 {
            self.subscriptions.clamp_to(report.base_position).await;
        }
        report
    }

    /// Events copied to the archive by retention, in log order.
    pub async fn archived_events(&self) -> Vec<Arc<DomainEvent>> {
        self.retention.archived().await
    }

    /// Hands the archived events to the caller and releases them from the
    /// engine. The archive only holds events until it is drained.
    pub async fn drain_archive(&self) -> Vec<Arc<DomainEvent>> {
        self.retention.drain_archived().await
    }

    // ----- handlers -----

    /// Registers an event handler for `event_type` (`"*"` for every type).
    pub async fn register_event_handler(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.register(event_type, handler).await;
    }

    // ----- subscriptions -----

    /// Creates a subscription.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::Validation` for an invalid spec.
    pub async fn subscribe(&self, spec: SubscriptionSpec) -> Result<Uuid, EventStoreError> {
        self.subscriptions.subscribe(spec, &self.log).await
    }

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::SubscriptionNotFound` for an unknown id.
    pub async fn unsubscribe(&self, id: Uuid) -> Result<(), EventStoreError> {
        self.subscriptions.unsubscribe(id).await
    }

    /// One subscription.
    pub async fn get_subscription(&self, id: Uuid) -> Option<SubscriptionInfo> {
        self.subscriptions.get(id).await
    }

    /// Every subscription.
    pub async fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions.list().await
    }

    /// Pauses an active subscription.
    ///
    /// # Errors
    ///
    /// `SubscriptionNotFound` or `Validation` (not active).
    pub async fn pause_subscription(&self, id: Uuid) -> Result<SubscriptionInfo, EventStoreError> {
        self.subscriptions.pause(id).await
    }

    /// Resumes a paused subscription.
    ///
    /// # Errors
    ///
    /// `SubscriptionNotFound` or `Validation` (not paused).
    pub async fn resume_subscription(&self, id: Uuid) -> Result<SubscriptionInfo, EventStoreError> {
        self.subscriptions.resume(id).await
    }

    /// Clears a subscription's error state.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::SubscriptionNotFound` for an unknown id.
    pub async fn reset_subscription(&self, id: Uuid) -> Result<SubscriptionInfo, EventStoreError> {
        self.subscriptions.reset(id).await
    }

    /// Runs one dispatch round over every active subscription.
    pub async fn tick_subscriptions(&self) -> TickReport {
        self.subscriptions.tick(&self.log).await
    }

    // ----- projections -----

    /// Creates a projection, rebuilding it immediately when
    /// `rebuild_on_start` is set.
    ///
    /// # Errors
    ///
    /// `ProjectionExists` for a duplicate name, `Validation` for an invalid
    /// config.
    #[instrument(skip(self, config), fields(projection = %config.name))]
    pub async fn create_projection(&self, config: ProjectionConfig) -> Result<(), EventStoreError> {
        let name = config.name.clone();
        let rebuild = config.rebuild_on_start;
        self.projections.create(config).await?;
        if rebuild {
            self.rebuild_projection(&name).await?;
        }
        Ok(())
    }

    /// Clears a projection and replays its retained history.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::ProjectionNotFound` for an unknown name.
    #[instrument(skip(self))]
    pub async fn rebuild_projection(&self, name: &str) -> Result<ProjectionStatus, EventStoreError> {
        let config = self
            .projections
            .config(name)
            .await
            .ok_or_else(|| EventStoreError::ProjectionNotFound(name.to_owned()))?;
        let seeds = if config.build_from_snapshot {
            self.snapshots.all().await
        } else {
            Vec::new()
        };
        self.projections.rebuild(name, &seeds, &self.log).await
    }

    /// Removes a projection.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::ProjectionNotFound` for an unknown name.
    pub async fn remove_projection(&self, name: &str) -> Result<(), EventStoreError> {
        self.projections.remove(name).await
    }

    /// Checkpoint bookkeeping of a projection.
    pub async fn projection_status(&self, name: &str) -> Option<ProjectionStatus> {
        self.projections.status(name).await
    }

    /// One read model.
    pub async fn get_read_model(&self, projection: &str, id: &str) -> Option<ReadModel> {
        self.projections.read_model(projection, id).await
    }

    /// Read models whose data contains every pair of `predicate`.
    pub async fn query_read_models(&self, projection: &str, predicate: &EventData) -> Vec<ReadModel> {
        self.projections.query(projection, predicate).await
    }

    // ----- sagas -----

    /// Starts a saga and runs it until it completes, fails, or waits on an
    /// event.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty step list, `Shutdown` after shutdown.
    #[instrument(skip(self, data, steps), fields(steps = steps.len()))]
    pub async fn start_saga(&self, saga_type: &str, data: Value, steps: Vec<SagaStep>) -> Result<Uuid, EventStoreError> {
        if self.is_shut_down() {
            return Err(EventStoreError::Shutdown);
        }
        self.sagas.start(saga_type, data, steps).await
    }

    /// One saga.
    pub async fn get_saga(&self, id: Uuid) -> Option<Saga> {
        self.sagas.get(id).await
    }

    /// Every saga.
    pub async fn list_sagas(&self) -> Vec<Saga> {
        self.sagas.list().await
    }

    // ----- replay -----

    /// Re-publishes retained events with timestamps in `[from, to]` and an
    /// optional type filter to event handlers and projections. Sagas are not
    /// replayed. Returns the number of events published.
    #[instrument(skip(self, event_types))]
    pub async fn replay(
        &self,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        event_types: Option<Vec<String>>,
    ) -> Result<usize, EventStoreError> {
        if self.is_shut_down() {
            return Err(EventStoreError::Shutdown);
        }
        let mut query = EventQuery::all().between(Some(from), to);
        if let Some(types) = event_types {
            query = query.event_types(types);
        }
        let events = self.log.query(&query).await;
        let replayed = events.len();
        if replayed > 0 {
            let batch: EventBatch = events.into();
            self.fanout.publish(&batch, &[Lane::Handlers, Lane::Projections]);
            if self.config.consistency_level == ConsistencyLevel::Strong {
                self.fanout.settle().await;
            }
        }
        info!(replayed, "replay published");
        Ok(replayed)
    }

    // ----- metrics -----

    /// Current engine metrics.
    pub async fn get_metrics(&self) -> EngineMetrics {
        let stats = self.log.stats().await;
        let inputs = MetricsInputs {
            total_events: stats.end_position,
            retained_bytes: stats.retained_bytes,
            snapshot_bytes: self.snapshots.total_size().await,
            active_streams: stats.active_streams,
            snapshot_count: self.snapshots.count().await,
            projection_count: self.projections.count().await,
            subscription_count: self.subscriptions.count().await,
        };
        self.metrics.snapshot(inputs, self.clock.now())
    }

    /// Batches published to fan-out consumers but not yet processed.
    #[must_use]
    pub fn fanout_backlog(&self) -> u64 {
        self.fanout.backlog()
    }

    // ----- lifecycle -----

    /// Restores events and snapshots from the repository without publishing
    /// them. Returns the number of events restored.
    ///
    /// # Errors
    ///
    /// `Validation` when the store already holds events, `Infrastructure`
    /// when loading fails or the stored history has version gaps.
    #[instrument(skip(self))]
    pub async fn hydrate(&self) -> Result<usize, EventStoreError> {
        let Some(repository) = &self.repository else {
            return Ok(0);
        };
        if self.log.end_position().await > 0 {
            return Err(EventStoreError::Validation(
                "hydrate requires an empty event store".into(),
            ));
        }

        let events = repository.load_all().await?;
        let restored = events.len();
        for event in events {
            let key = event.stream_key();
            let expected = self.log.current_version(&key).await + 1;
            if event.aggregate_version != expected {
                return Err(EventStoreError::Infrastructure(format!(
                    "stored stream {key} jumps to version {} (expected {expected})",
                    event.aggregate_version
                )));
            }
            let bytes = event.encoded_size() as u64;
            let timestamp = event.timestamp;
            self.log.commit(&key, vec![event], timestamp).await;
            self.metrics.record(1, bytes);
        }

        let mut installed = 0;
        for snapshot in repository.load_snapshots().await? {
            let key = snapshot.stream_key();
            let version = self.log.current_version(&key).await;
            if snapshot.version == 0 || snapshot.version > version {
                warn!(stream = %key, snapshot_version = snapshot.version, version, "stored snapshot ignored");
                continue;
            }
            self.snapshots.install(&self.log, snapshot).await;
            installed += 1;
        }
        info!(events = restored, snapshots = installed, "event store hydrated");
        Ok(restored)
    }

    /// Spawns the subscription, snapshot and retention tickers. Calling it
    /// again has no effect.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) || self.is_shut_down() {
            return;
        }
        let tickers = vec![
            self.spawn_ticker("subscriptions", self.config.subscription_tick, |store| async move {
                store.tick_subscriptions().await;
            }),
            self.spawn_ticker("snapshots", self.config.snapshot_sweep_interval, |store| async move {
                store.run_snapshot_sweep().await;
            }),
            self.spawn_ticker("retention", self.config.retention_sweep_interval, |store| async move {
                store.run_retention_sweep().await;
            }),
        ];
        self.tickers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tickers);
        info!("event store started");
    }

    fn spawn_ticker<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, work: F) -> JoinHandle<()>
    where
        F: Fn(Arc<EventStore>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(store) = weak.upgrade() else { break };
                        work(store).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(ticker = name, "ticker stopped");
        })
    }

    /// Waits until every fan-out consumer has processed the batches published
    /// so far.
    pub async fn settle(&self) {
        self.fanout.settle().await;
    }

    /// Stops the tickers, marks subscriptions stopped, drains the fan-out
    /// lanes and rejects further appends.
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let tickers: Vec<JoinHandle<()>> = self
            .tickers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for ticker in tickers {
            if let Err(e) = ticker.await {
                error!(error = %e, "ticker task failed");
            }
        }
        self.subscriptions.stop_all().await;
        self.fanout.shutdown().await;
        info!("event store shut down");
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("config", &self.config)
            .field("durable", &self.repository.is_some())
            .finish_non_exhaustive()
    }
}
