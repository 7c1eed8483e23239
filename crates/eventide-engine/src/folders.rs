//! Per-aggregate-type fold registration.

use std::collections::HashMap;
use std::sync::Arc;

use eventide_core::aggregate::{AggregateFolder, AggregateState, MergeFolder, fold_events};
use eventide_core::event::DomainEvent;
use tokio::sync::RwLock;

/// Folders keyed by aggregate type; unregistered types use [`MergeFolder`].
#[derive(Default)]
pub struct FolderRegistry {
    folders: RwLock<HashMap<String, Arc<dyn AggregateFolder>>>,
}

impl FolderRegistry {
    /// Registers (or replaces) the folder for `aggregate_type`.
    pub async fn register(&self, aggregate_type: impl Into<String>, folder: Arc<dyn AggregateFolder>) {
        self.folders.write().await.insert(aggregate_type.into(), folder);
    }

    /// Folder for `aggregate_type`.
    pub async fn folder_for(&self, aggregate_type: &str) -> Arc<dyn AggregateFolder> {
        self.folders
            .read()
            .await
            .get(aggregate_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(MergeFolder))
    }

    /// Folds `events` of `aggregate_type` on top of `seed`.
    pub async fn fold(
        &self,
        aggregate_type: &str,
        seed: AggregateState,
        events: &[Arc<DomainEvent>],
    ) -> AggregateState {
        let folder = self.folder_for(aggregate_type).await;
        fold_events(folder.as_ref(), seed, events.iter().map(|event| &**event))
    }
}

impl std::fmt::Debug for FolderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderRegistry").finish_non_exhaustive()
    }
}
