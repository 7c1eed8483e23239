//! Snapshot manager.
//!
//! Computes folded aggregate state, stores at most one active snapshot per
//! stream and trims the stream's retained events up to the snapshot version.
//! Callers hold the stream's append lock, so a snapshot always folds exactly
//! the committed events at the stream's current version.

use std::sync::Arc;

use eventide_core::clock::Clock;
use eventide_core::error::EventStoreError;
use eventide_core::event::StreamKey;
use eventide_core::repository::EventRepository;
use eventide_core::snapshot::{Snapshot, SnapshotMetadata, SnapshotReason};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::arena::{Handle, Registry};
use crate::folders::FolderRegistry;
use crate::log::EventLog;

/// Owns the active snapshot of every stream.
pub struct SnapshotManager {
    snapshots: RwLock<Registry<StreamKey, Snapshot>>,
    folders: Arc<FolderRegistry>,
    repository: Option<Arc<dyn EventRepository>>,
    clock: Arc<dyn Clock>,
}

impl SnapshotManager {
    /// Creates a manager sharing the engine's folders, repository and clock.
    #[must_use]
    pub fn new(
        folders: Arc<FolderRegistry>,
        repository: Option<Arc<dyn EventRepository>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            snapshots: RwLock::new(Registry::new()),
            folders,
            repository,
            clock,
        }
    }

    /// Active snapshot of `key`.
    pub async fn active(&self, key: &StreamKey) -> Option<Snapshot> {
        self.snapshots.read().await.get_by_key(key).cloned()
    }

    /// Resolves a stream's snapshot handle; `None` once superseded.
    pub async fn resolve(&self, handle: Handle) -> Option<Snapshot> {
        self.snapshots.read().await.get(handle).cloned()
    }

    /// All active snapshots.
    pub async fn all(&self) -> Vec<Snapshot> {
        self.snapshots.read().await.values().cloned().collect()
    }

    /// Number of active snapshots.
    pub async fn count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Sum of the encoded sizes of all active snapshots.
    pub async fn total_size(&self) -> u64 {
        self.snapshots
            .read()
            .await
            .values()
            .map(|snapshot| snapshot.metadata.compressed_size)
            .sum()
    }

    /// Folds `key` at its current version, stores the snapshot and trims the
    /// stream. Returns `None` for an unknown stream. A stream already
    /// snapshotted at its current version returns the existing snapshot.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::Infrastructure` if the state cannot be
    /// encoded or the durable write fails.
    pub(crate) async fn snapshot_stream(
        &self,
        log: &EventLog,
        key: &StreamKey,
        reason: SnapshotReason,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        let Some(stream) = log.stream(key).await else {
            return Ok(None);
        };
        let previous = match stream.snapshot {
            Some(handle) => self.resolve(handle).await,
            None => None,
        };
        if let Some(previous) = previous.as_ref().filter(|s| s.version == stream.version) {
            debug!(stream = %key, version = stream.version, "snapshot already current");
            return Ok(Some(previous.clone()));
        }

        let after = previous.as_ref().map_or(0, |s| s.version);
        let seed = previous.map(|s| s.data).unwrap_or_default();
        let events = log.stream_events(key, after, stream.version).await;
        let state = self.folders.fold(&key.aggregate_type, seed, &events).await;

        let encoded = serde_json::to_vec(&state)
            .map_err(|e| EventStoreError::Infrastructure(format!("snapshot encoding failed: {e}")))?;
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            aggregate_id: key.aggregate_id.clone(),
            aggregate_type: key.aggregate_type.clone(),
            version: stream.version,
            data: state,
            timestamp: self.clock.now(),
            metadata: SnapshotMetadata {
                reason,
                event_count: u64::try_from(stream.version).unwrap_or_default(),
                compressed_size: encoded.len() as u64,
                checksum: checksum(&encoded),
            },
        };

        if let Some(repository) = &self.repository {
            repository.save_snapshot(&snapshot).await?;
        }
        let trimmed = self.install(log, snapshot.clone()).await;

        info!(
            stream = %key,
            version = snapshot.version,
            reason = %reason,
            trimmed,
            "snapshot created"
        );
        Ok(Some(snapshot))
    }

    /// Makes `snapshot` the active one for its stream and trims the stream.
    pub(crate) async fn install(&self, log: &EventLog, snapshot: Snapshot) -> usize {
        let key = snapshot.stream_key();
        let version = snapshot.version;
        let (handle, _superseded) = self.snapshots.write().await.insert(key.clone(), snapshot);
        log.attach_snapshot(&key, handle, version).await
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager").finish_non_exhaustive()
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub(crate) fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_hex_sha256() {
        assert_eq!(
            checksum(b"{}"),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
