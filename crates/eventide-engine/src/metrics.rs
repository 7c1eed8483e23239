//! Engine metrics surface.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time engine metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineMetrics {
    /// Events ever appended (or hydrated).
    pub total_events: u64,
    /// `total_events` divided by uptime in seconds.
    pub events_per_second: f64,
    /// Mean encoded event size in bytes.
    pub average_event_size: f64,
    /// Retained event bytes plus snapshot bytes.
    pub storage_size: u64,
    pub active_streams: usize,
    pub snapshot_count: usize,
    pub projection_count: usize,
    pub subscription_count: usize,
    /// Always zero: a single process owns the log.
    pub replication_lag: u64,
}

/// Inputs gathered from the engine's components.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MetricsInputs {
    pub(crate) total_events: u64,
    pub(crate) retained_bytes: u64,
    pub(crate) snapshot_bytes: u64,
    pub(crate) active_streams: usize,
    pub(crate) snapshot_count: usize,
    pub(crate) projection_count: usize,
    pub(crate) subscription_count: usize,
}

/// Cumulative counters that outlive retention.
#[derive(Debug)]
pub(crate) struct MetricsRecorder {
    started_at: DateTime<Utc>,
    appended_bytes: AtomicU64,
    appended_events: AtomicU64,
}

impl MetricsRecorder {
    pub(crate) fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            appended_bytes: AtomicU64::new(0),
            appended_events: AtomicU64::new(0),
        }
    }

    pub(crate) fn record(&self, events: usize, bytes: u64) {
        self.appended_events.fetch_add(events as u64, Ordering::Relaxed);
        self.appended_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn snapshot(&self, inputs: MetricsInputs, now: DateTime<Utc>) -> EngineMetrics {
        let uptime = (now - self.started_at).num_milliseconds().max(1) as f64 / 1000.0;
        let appended = self.appended_events.load(Ordering::Relaxed);
        let bytes = self.appended_bytes.load(Ordering::Relaxed);
        let average_event_size = if appended == 0 {
            0.0
        } else {
            bytes as f64 / appended as f64
        };
        EngineMetrics {
            total_events: inputs.total_events,
            events_per_second: inputs.total_events as f64 / uptime,
            average_event_size,
            storage_size: inputs.retained_bytes + inputs.snapshot_bytes,
            active_streams: inputs.active_streams,
            snapshot_count: inputs.snapshot_count,
            projection_count: inputs.projection_count,
            subscription_count: inputs.subscription_count,
            replication_lag: 0,
        }
    }
}
