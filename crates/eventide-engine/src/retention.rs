//! Retention sweeper.
//!
//! Purges the oldest prefix of the global log. An entry is eligible when the
//! policy selects it (older than `max_age`, or outside the newest
//! `max_events`) and its stream's active snapshot covers its version. The
//! sweep stops at the first ineligible entry so positions stay contiguous.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use eventide_core::clock::Clock;
use eventide_core::event::DomainEvent;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::RetentionPolicy;
use crate::log::EventLog;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    /// Entries selected by the policy and covered by a snapshot.
    pub eligible: usize,
    /// Entries newly copied to the archive.
    pub archived: usize,
    /// Entries removed from the log.
    pub deleted: usize,
    /// First retained position after the sweep.
    pub base_position: u64,
}

#[derive(Debug, Default)]
struct Archive {
    events: Vec<Arc<DomainEvent>>,
    archived_through: u64,
}

/// Applies a [`RetentionPolicy`] to an [`EventLog`].
pub struct RetentionSweeper {
    policy: RetentionPolicy,
    archive: RwLock<Archive>,
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    /// Creates a sweeper.
    #[must_use]
    pub fn new(policy: RetentionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            archive: RwLock::new(Archive::default()),
            clock,
        }
    }

    /// Archived events in log order.
    pub async fn archived(&self) -> Vec<Arc<DomainEvent>> {
        self.archive.read().await.events.clone()
    }

    /// Removes and returns the archived events in log order. Positions
    /// already archived are not archived again by later sweeps.
    pub async fn drain_archived(&self) -> Vec<Arc<DomainEvent>> {
        let drained = std::mem::take(&mut self.archive.write().await.events);
        if !drained.is_empty() {
            info!(drained = drained.len(), "archive drained");
        }
        drained
    }

    /// Runs one sweep over `log`.
    pub async fn sweep(&self, log: &EventLog) -> RetentionReport {
        if !self.policy.is_enabled() {
            return RetentionReport {
                base_position: log.base_position().await,
                ..RetentionReport::default()
            };
        }

        let now = self.clock.now();
        let max_age = self
            .policy
            .max_age
            .and_then(|age| ChronoDuration::from_std(age).ok());
        let policy = self.policy.clone();
        let mut archive = self.archive.write().await;

        let report = log
            .with_global_mut(|streams, global| {
                let total = global.entries.len();
                let keep_newest = policy.max_events.unwrap_or(total);
                let over_count = total.saturating_sub(keep_newest);

                let eligible = global
                    .entries
                    .iter()
                    .enumerate()
                    .take_while(|(index, entry)| {
                        let event = &entry.event;
                        let too_old = max_age.is_some_and(|age| now - event.timestamp > age);
                        let too_many = *index < over_count;
                        let covered = streams
                            .get_by_key(&event.stream_key())
                            .is_some_and(|stream| event.aggregate_version <= stream.snapshot_version);
                        (too_old || too_many) && covered
                    })
                    .count();

                let mut archived = 0;
                if policy.archive_old_events {
                    for (offset, entry) in global.entries.iter().take(eligible).enumerate() {
                        let position = global.base + offset as u64;
                        if position >= archive.archived_through {
                            archive.events.push(Arc::clone(&entry.event));
                            archived += 1;
                        }
                    }
                    archive.archived_through = archive.archived_through.max(global.base + eligible as u64);
                }

                let mut deleted = 0;
                if policy.deletes() {
                    for entry in global.entries.drain(..eligible) {
                        global.retained_bytes = global.retained_bytes.saturating_sub(entry.size as u64);
                        deleted += 1;
                    }
                    global.base += deleted as u64;
                }

                RetentionReport {
                    eligible,
                    archived,
                    deleted,
                    base_position: global.base,
                }
            })
            .await;

        if report.eligible > 0 {
            info!(
                eligible = report.eligible,
                archived = report.archived,
                deleted = report.deleted,
                base_position = report.base_position,
                "retention sweep completed"
            );
        }
        report
    }
}

impl std::fmt::Debug for RetentionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionSweeper")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
