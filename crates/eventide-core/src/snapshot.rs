//! Snapshot records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::AggregateState;
use crate::event::StreamKey;

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    /// Taken by the background sweep.
    Periodic,
    /// Taken after an append crossed the configured threshold.
    SizeThreshold,
    /// Requested explicitly.
    Manual,
}

impl SnapshotReason {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Periodic => "periodic",
            Self::SizeThreshold => "size_threshold",
            Self::Manual => "manual",
        }
    }

    /// Parses the storage form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "periodic" => Some(Self::Periodic),
            "size_threshold" => Some(Self::SizeThreshold),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping recorded alongside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Trigger.
    pub reason: SnapshotReason,
    /// Number of events folded into the state.
    pub event_count: u64,
    /// Compact JSON size of the state in bytes.
    pub compressed_size: u64,
    /// Lowercase hex SHA-256 of the compact JSON state.
    pub checksum: String,
}

/// Folded aggregate state as of `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot identifier.
    pub id: Uuid,
    /// Aggregate identifier.
    pub aggregate_id: String,
    /// Aggregate type.
    pub aggregate_type: String,
    /// Stream version the state is folded up to (inclusive).
    pub version: i64,
    /// Folded state.
    pub data: AggregateState,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Snapshot bookkeeping.
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Returns the stream this snapshot belongs to.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(&self.aggregate_type, &self.aggregate_id)
    }
}
