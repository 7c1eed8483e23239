//! Shared helpers for engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use eventide_core::event::{DomainEvent, EventMetadata, NewEvent, to_event_data};
use eventide_engine::{EngineConfig, EventStore, EventStoreBuilder};
use eventide_test_support::FixedClock;
use serde_json::Value;
use uuid::Uuid;

/// Fixed timestamp used across the engine tests.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

/// Builder with a fixed clock.
pub fn builder(config: EngineConfig) -> EventStoreBuilder {
    EventStore::builder(config).with_clock(Arc::new(FixedClock(fixed_now())))
}

/// Store with a fixed clock and no repository.
pub fn build_store(config: EngineConfig) -> Arc<EventStore> {
    builder(config).build().unwrap()
}

/// Config with the given snapshot frequency and defaults otherwise.
pub fn config_with_frequency(snapshot_frequency: usize) -> EngineConfig {
    EngineConfig {
        snapshot_frequency,
        ..EngineConfig::default()
    }
}

/// A single new event.
pub fn new_event(event_type: &str, data: Value) -> Vec<NewEvent> {
    vec![NewEvent::new(event_type, data)]
}

/// A stored event, as a durable repository would hand it back.
pub fn stored_event(aggregate_type: &str, aggregate_id: &str, version: i64, event_type: &str, data: Value) -> DomainEvent {
    DomainEvent {
        id: Uuid::new_v4(),
        event_type: event_type.to_owned(),
        aggregate_id: aggregate_id.to_owned(),
        aggregate_type: aggregate_type.to_owned(),
        aggregate_version: version,
        timestamp: fixed_now(),
        data: to_event_data(data),
        metadata: EventMetadata::default(),
        caused_by: None,
        correlation_id: None,
    }
}

/// Polls `check` every 10ms until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
