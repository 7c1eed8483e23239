//! Event log store: the global append-ordered log and per-aggregate streams.
//!
//! Lock order when both are needed: `streams`, then `global`.
//! Appends to one stream are serialized by that stream's append lock
//! ([`EventLog::lock_stream`]), which callers hold across the version check,
//! the durable write and the commit.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use eventide_core::event::{DomainEvent, StreamKey};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

use crate::arena::{Handle, Registry};
use crate::query::EventQuery;

/// One aggregate stream.
#[derive(Debug, Clone)]
pub struct EventStream {
    /// Stream identity.
    pub key: StreamKey,
    /// Number of events ever appended.
    pub version: i64,
    /// Retained events, ordered by version. Events covered by the active
    /// snapshot are trimmed.
    pub events: Vec<Arc<DomainEvent>>,
    /// Active snapshot in the snapshot registry.
    pub snapshot: Option<Handle>,
    /// Version covered by the active snapshot, `0` without one.
    pub snapshot_version: i64,
    /// Time of the last append.
    pub last_modified: DateTime<Utc>,
}

impl EventStream {
    fn new(key: StreamKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            version: 0,
            events: Vec::new(),
            snapshot: None,
            snapshot_version: 0,
            last_modified: now,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LogEntry {
    pub(crate) event: Arc<DomainEvent>,
    pub(crate) size: usize,
}

/// Global log with absolute positions. `base` is the position of the first
/// retained entry; positions below it have been purged by retention.
#[derive(Debug, Default)]
pub(crate) struct GlobalLog {
    pub(crate) base: u64,
    pub(crate) entries: VecDeque<LogEntry>,
    pub(crate) retained_bytes: u64,
}

impl GlobalLog {
    pub(crate) fn end(&self) -> u64 {
        self.base + self.entries.len() as u64
    }
}

/// A batch read from the global log.
#[derive(Debug, Clone, Default)]
pub struct LogSlice {
    /// Position of the first event returned.
    pub start: u64,
    /// Events in append order.
    pub events: Vec<Arc<DomainEvent>>,
    /// Position just past the last event returned.
    pub next: u64,
}

/// Point-in-time counters for metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStats {
    /// Streams known to the log.
    pub active_streams: usize,
    /// Absolute end of the global log (events ever appended).
    pub end_position: u64,
    /// Entries currently retained.
    pub retained_events: usize,
    /// Encoded bytes of the retained entries.
    pub retained_bytes: u64,
}

/// Ordered event storage.
#[derive(Debug, Default)]
pub struct EventLog {
    streams: RwLock<Registry<StreamKey, EventStream>>,
    global: RwLock<GlobalLog>,
    append_locks: Mutex<HashMap<StreamKey, Arc<AsyncMutex<()>>>>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the append lock for `key`.
    pub async fn lock_stream(&self, key: &StreamKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .append_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Current version of `key`, `0` for an unknown stream.
    pub async fn current_version(&self, key: &StreamKey) -> i64 {
        self.streams
            .read()
            .await
            .get_by_key(key)
            .map_or(0, |stream| stream.version)
    }

    /// Appends already-versioned events to their stream and the global log.
    /// Caller holds the stream's append lock and has checked the version.
    pub(crate) async fn commit(
        &self,
        key: &StreamKey,
        events: Vec<DomainEvent>,
        now: DateTime<Utc>,
    ) -> Vec<Arc<DomainEvent>> {
        let committed: Vec<Arc<DomainEvent>> = events.into_iter().map(Arc::new).collect();
        let mut streams = self.streams.write().await;
        let mut global = self.global.write().await;

        if !streams.contains_key(key) {
            streams.insert(key.clone(), EventStream::new(key.clone(), now));
        }
        if let Some(stream) = streams.get_by_key_mut(key) {
            for event in &committed {
                stream.version = stream.version.max(event.aggregate_version);
                stream.events.push(Arc::clone(event));
            }
            stream.last_modified = now;
        }
        for event in &committed {
            let size = event.encoded_size();
            global.retained_bytes += size as u64;
            global.entries.push_back(LogEntry {
                event: Arc::clone(event),
                size,
            });
        }
        committed
    }

    /// Copy of one stream's bookkeeping.
    pub async fn stream(&self, key: &StreamKey) -> Option<EventStream> {
        self.streams.read().await.get_by_key(key).cloned()
    }

    /// Keys of streams whose retained slice holds at least `threshold` events.
    pub async fn streams_over(&self, threshold: usize) -> Vec<StreamKey> {
        let streams = self.streams.read().await;
        let mut keys: Vec<StreamKey> = streams
            .values()
            .filter(|stream| stream.events.len() >= threshold)
            .map(|stream| stream.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Records the active snapshot of a stream and trims the events it covers.
    pub(crate) async fn attach_snapshot(&self, key: &StreamKey, handle: Handle, version: i64) -> usize {
        let mut streams = self.streams.write().await;
        let Some(stream) = streams.get_by_key_mut(key) else {
            return 0;
        };
        stream.snapshot = Some(handle);
        stream.snapshot_version = version;
        let before = stream.events.len();
        stream.events.retain(|event| event.aggregate_version > version);
        before - stream.events.len()
    }

    /// Events of `key` with versions in `(after, up_to]`. Reads the retained
    /// stream slice first and falls back to the global log for trimmed
    /// versions.
    pub async fn stream_events(&self, key: &StreamKey, after: i64, up_to: i64) -> Vec<Arc<DomainEvent>> {
        let streams = self.streams.read().await;
        let Some(stream) = streams.get_by_key(key) else {
            return Vec::new();
        };
        let retained_from = stream
            .events
            .first()
            .map_or(stream.version + 1, |event| event.aggregate_version);
        let in_range = |event: &&Arc<DomainEvent>| {
            event.aggregate_version > after && event.aggregate_version <= up_to
        };

        if after + 1 >= retained_from {
            return stream.events.iter().filter(in_range).cloned().collect();
        }

        let global = self.global.read().await;
        global
            .entries
            .iter()
            .map(|entry| &entry.event)
            .filter(|event| event.aggregate_type == key.aggregate_type && event.aggregate_id == key.aggregate_id)
            .filter(in_range)
            .cloned()
            .collect()
    }

    /// Reads up to `limit` entries starting at absolute `position`. A position
    /// behind the retained base starts at the base.
    pub async fn read_from(&self, position: u64, limit: usize) -> LogSlice {
        let global = self.global.read().await;
        let start = position.max(global.base);
        let Ok(offset) = usize::try_from(start - global.base) else {
            return LogSlice {
                start,
                events: Vec::new(),
                next: start,
            };
        };
        let events: Vec<Arc<DomainEvent>> = global
            .entries
            .iter()
            .skip(offset)
            .take(limit)
            .map(|entry| Arc::clone(&entry.event))
            .collect();
        let next = start + events.len() as u64;
        LogSlice { start, events, next }
    }

    /// Evaluates `query` against the retained global log.
    pub async fn query(&self, query: &EventQuery) -> Vec<Arc<DomainEvent>> {
        let global = self.global.read().await;
        let matching = global
            .entries
            .iter()
            .map(|entry| &entry.event)
            .filter(|event| query.matches(event))
            .cloned();
        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Absolute end position of the global log.
    pub async fn end_position(&self) -> u64 {
        self.global.read().await.end()
    }

    /// Absolute position of the first retained entry.
    pub async fn base_position(&self) -> u64 {
        self.global.read().await.base
    }

    /// Counters for metrics.
    pub async fn stats(&self) -> LogStats {
        let streams = self.streams.read().await;
        let global = self.global.read().await;
        LogStats {
            active_streams: streams.len(),
            end_position: global.end(),
            retained_events: global.entries.len(),
            retained_bytes: global.retained_bytes,
        }
    }

    /// Runs `f` with exclusive access to the global log and shared access to
    /// the streams. Used by the retention sweep.
    pub(crate) async fn with_global_mut<R>(
        &self,
        f: impl FnOnce(&Registry<StreamKey, EventStream>, &mut GlobalLog) -> R,
    ) -> R {
        let streams = self.streams.read().await;
        let mut global = self.global.write().await;
        f(&*streams, &mut *global)
    }
}
