//! Subscription dispatcher: independent cursors over the global log.
//!
//! Delivery is at-least-once. A cursor only advances after its handler
//! accepts a batch; a failed batch is redelivered on the next tick until
//! `max_retries` consecutive failures put the subscription into `error`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use eventide_core::clock::Clock;
use eventide_core::error::{EventStoreError, HandlerError};
use eventide_core::event::DomainEvent;
use eventide_core::handler::SubscriptionHandler;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::arena::Registry;
use crate::log::EventLog;

/// Extra per-event filter applied after the type filter.
pub type EventPredicate = Arc<dyn Fn(&DomainEvent) -> bool + Send + Sync>;

/// Where a new subscription starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "position")]
pub enum StartPosition {
    /// The oldest retained event.
    #[default]
    Beginning,
    /// The current end of the log; history is skipped.
    End,
    /// An absolute log position.
    Offset(u64),
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Delivering on every tick.
    Active,
    /// Temporarily not delivering.
    Paused,
    /// Stopped by engine shutdown.
    Stopped,
    /// Exhausted its retries; needs a reset.
    Error,
}

/// Everything needed to create a subscription.
pub struct SubscriptionSpec {
    /// Event types delivered; empty means every type.
    pub event_types: HashSet<String>,
    /// Initial cursor.
    pub start: StartPosition,
    /// Log entries read per tick.
    pub batch_size: usize,
    /// Consecutive failures before the subscription enters `error`.
    pub max_retries: u32,
    /// Optional extra filter.
    pub predicate: Option<EventPredicate>,
    /// Batch consumer.
    pub handler: Arc<dyn SubscriptionHandler>,
}

impl SubscriptionSpec {
    /// A subscription from the beginning over every event type.
    #[must_use]
    pub fn new(handler: Arc<dyn SubscriptionHandler>) -> Self {
        Self {
            event_types: HashSet::new(),
            start: StartPosition::Beginning,
            batch_size: 100,
            max_retries: 3,
            predicate: None,
            handler,
        }
    }

    /// Restricts delivery to `types`.
    #[must_use]
    pub fn event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the start position.
    #[must_use]
    pub fn start_at(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Adds a predicate.
    #[must_use]
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DomainEvent) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

impl std::fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("event_types", &self.event_types)
            .field("start", &self.start)
            .field("batch_size", &self.batch_size)
            .field("max_retries", &self.max_retries)
            .field("predicate", &self.predicate.is_some())
            .finish_non_exhaustive()
    }
}

/// Read-only view of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: Uuid,
    pub event_types: Vec<String>,
    pub position: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub error_count: u32,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub last_processed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Outcome of one dispatcher tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Events handed to handlers that accepted them.
    pub delivered: usize,
    /// Batches rejected by their handler.
    pub failed: usize,
}

struct Subscription {
    id: Uuid,
    event_types: HashSet<String>,
    position: u64,
    batch_size: usize,
    max_retries: u32,
    error_count: u32,
    status: SubscriptionStatus,
    predicate: Option<EventPredicate>,
    handler: Arc<dyn SubscriptionHandler>,
    created_at: DateTime<Utc>,
    last_processed: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Subscription {
    fn accepts(&self, event: &DomainEvent) -> bool {
        (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
            && self.predicate.as_ref().is_none_or(|predicate| predicate(event))
    }

    fn info(&self) -> SubscriptionInfo {
        let mut event_types: Vec<String> = self.event_types.iter().cloned().collect();
        event_types.sort();
        SubscriptionInfo {
            id: self.id,
            event_types,
            position: self.position,
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            error_count: self.error_count,
            status: self.status,
            created_at: self.created_at,
            last_processed: self.last_processed,
            last_error: self.last_error.clone(),
        }
    }
}

/// Work item for one subscription in one tick, taken under the read lock.
struct Pending {
    id: Uuid,
    position: u64,
    batch_size: usize,
}

/// Owns every subscription cursor.
pub struct SubscriptionDispatcher {
    subscriptions: RwLock<Registry<Uuid, Subscription>>,
    tick_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            subscriptions: RwLock::new(Registry::new()),
            tick_lock: Mutex::new(()),
            clock,
        }
    }

    /// Registers a subscription and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::Validation` for a zero batch size or retry
    /// budget, or an offset past the end of the log.
    pub async fn subscribe(&self, spec: SubscriptionSpec, log: &EventLog) -> Result<Uuid, EventStoreError> {
        if spec.batch_size == 0 || spec.max_retries == 0 {
            return Err(EventStoreError::Validation(
                "subscription batch_size and max_retries must be > 0".into(),
            ));
        }
        let end = log.end_position().await;
        let position = match spec.start {
            StartPosition::Beginning => log.base_position().await,
            StartPosition::End => end,
            StartPosition::Offset(offset) if offset <= end => offset,
            StartPosition::Offset(offset) => {
                return Err(EventStoreError::Validation(format!(
                    "subscription offset {offset} is past the end of the log ({end})"
                )));
            }
        };

        let id = Uuid::new_v4();
        let subscription = Subscription {
            id,
            event_types: spec.event_types,
            position,
            batch_size: spec.batch_size,
            max_retries: spec.max_retries,
            error_count: 0,
            status: SubscriptionStatus::Active,
            predicate: spec.predicate,
            handler: spec.handler,
            created_at: self.clock.now(),
            last_processed: None,
            last_error: None,
        };
        info!(subscription_id = %id, position, "subscription created");
        self.subscriptions.write().await.insert(id, subscription);
        Ok(id)
    }

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::SubscriptionNotFound` for an unknown id.
    pub async fn unsubscribe(&self, id: Uuid) -> Result<(), EventStoreError> {
        self.subscriptions
            .write()
            .await
            .remove(&id)
            .map(|_| info!(subscription_id = %id, "subscription removed"))
            .ok_or(EventStoreError::SubscriptionNotFound(id))
    }

    /// One subscription.
    pub async fn get(&self, id: Uuid) -> Option<SubscriptionInfo> {
        self.subscriptions.read().await.get_by_key(&id).map(Subscription::info)
    }

    /// Every subscription, oldest first.
    pub async fn list(&self) -> Vec<SubscriptionInfo> {
        let mut all: Vec<SubscriptionInfo> = self
            .subscriptions
            .read()
            .await
            .values()
            .map(Subscription::info)
            .collect();
        all.sort_by_key(|info| (info.created_at, info.id));
        all
    }

    /// Number of subscriptions.
    pub async fn count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Stops delivery to an active subscription.
    ///
    /// # Errors
    ///
    /// `SubscriptionNotFound` for an unknown id, `Validation` unless active.
    pub async fn pause(&self, id: Uuid) -> Result<SubscriptionInfo, EventStoreError> {
        self.transition(id, SubscriptionStatus::Active, SubscriptionStatus::Paused)
            .await
    }

    /// Restarts delivery to a paused subscription.
    ///
    /// # Errors
    ///
    /// `SubscriptionNotFound` for an unknown id, `Validation` unless paused.
    pub async fn resume(&self, id: Uuid) -> Result<SubscriptionInfo, EventStoreError> {
        self.transition(id, SubscriptionStatus::Paused, SubscriptionStatus::Active)
            .await
    }

    /// Clears the error state and reactivates the subscription at its current
    /// position.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::SubscriptionNotFound` for an unknown id.
    pub async fn reset(&self, id: Uuid) -> Result<SubscriptionInfo, EventStoreError> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_by_key_mut(&id)
            .ok_or(EventStoreError::SubscriptionNotFound(id))?;
        subscription.status = SubscriptionStatus::Active;
        subscription.error_count = 0;
        subscription.last_error = None;
        info!(subscription_id = %id, position = subscription.position, "subscription reset");
        Ok(subscription.info())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<SubscriptionInfo, EventStoreError> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_by_key_mut(&id)
            .ok_or(EventStoreError::SubscriptionNotFound(id))?;
        if subscription.status != from {
            return Err(EventStoreError::Validation(format!(
                "subscription {id} is {:?}, expected {from:?}",
                subscription.status
            )));
        }
        subscription.status = to;
        debug!(subscription_id = %id, status = ?to, "subscription status changed");
        Ok(subscription.info())
    }

    /// Moves cursors behind `base` (purged by retention) forward to it.
    pub async fn clamp_to(&self, base: u64) {
        let mut subscriptions = self.subscriptions.write().await;
        for subscription in subscriptions.values_mut() {
            if subscription.position < base {
                warn!(
                    subscription_id = %subscription.id,
                    from = subscription.position,
                    to = base,
                    "subscription cursor skipped purged events"
                );
                subscription.position = base;
            }
        }
    }

    /// Marks every subscription stopped.
    pub async fn stop_all(&self) {
        for subscription in self.subscriptions.write().await.values_mut() {
            subscription.status = SubscriptionStatus::Stopped;
        }
    }

    /// Delivers one batch to every active subscription.
    pub async fn tick(&self, log: &EventLog) -> TickReport {
        let _tick = self.tick_lock.lock().await;
        let pending: Vec<Pending> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|subscription| subscription.status == SubscriptionStatus::Active)
            .map(|subscription| Pending {
                id: subscription.id,
                position: subscription.position,
                batch_size: subscription.batch_size,
            })
            .collect();

        let mut report = TickReport::default();
        for work in pending {
            let slice = log.read_from(work.position, work.batch_size).await;
            if slice.next == work.position {
                continue;
            }

            let (batch, handler) = {
                let subscriptions = self.subscriptions.read().await;
                let Some(subscription) = subscriptions.get_by_key(&work.id) else {
                    continue;
                };
                let batch: Vec<Arc<DomainEvent>> = slice
                    .events
                    .iter()
                    .filter(|event| subscription.accepts(event))
                    .cloned()
                    .collect();
                (batch, Arc::clone(&subscription.handler))
            };

            let delivered = batch.len();
            let outcome = if batch.is_empty() {
                Ok(())
            } else {
                deliver(handler, batch).await
            };

            let mut subscriptions = self.subscriptions.write().await;
            let Some(subscription) = subscriptions.get_by_key_mut(&work.id) else {
                continue;
            };
            match outcome {
                Ok(()) => {
                    subscription.position = subscription.position.max(slice.next);
                    subscription.error_count = 0;
                    subscription.last_error = None;
                    if delivered > 0 {
                        subscription.last_processed = Some(self.clock.now());
                        report.delivered += delivered;
                        debug!(subscription_id = %work.id, delivered, position = subscription.position, "batch delivered");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    subscription.error_count += 1;
                    subscription.last_error = Some(e.to_string());
                    // A pause or stop that landed during delivery wins.
                    if subscription.status != SubscriptionStatus::Active {
                        debug!(
                            subscription_id = %work.id,
                            status = ?subscription.status,
                            error = %e,
                            "batch failed after the subscription left active"
                        );
                    } else if subscription.error_count >= subscription.max_retries {
                        subscription.status = SubscriptionStatus::Error;
                        error!(
                            subscription_id = %work.id,
                            position = subscription.position,
                            error_count = subscription.error_count,
                            error = %e,
                            "subscription exhausted its retries"
                        );
                    } else {
                        warn!(
                            subscription_id = %work.id,
                            position = subscription.position,
                            error_count = subscription.error_count,
                            error = %e,
                            "subscription batch failed, will redeliver"
                        );
                    }
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for SubscriptionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionDispatcher").finish_non_exhaustive()
    }
}

async fn deliver(
    handler: Arc<dyn SubscriptionHandler>,
    batch: Vec<Arc<DomainEvent>>,
) -> Result<(), HandlerError> {
    tokio::spawn(async move { handler.handle(&batch).await })
        .await
        .unwrap_or_else(|e| Err(HandlerError::failed(format!("subscription handler panicked: {e}"))))
}
