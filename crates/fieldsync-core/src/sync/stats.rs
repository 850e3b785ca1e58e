//! Aggregate counters recomputed after every session.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::{SyncItem, SyncStats, SyncStatus};
use crate::storage::{load_json, save_json, PersistenceAdapter, StorageKey};
use crate::Result;

/// Measurements of one finished session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    /// Items the remote accepted
    pub synced: u64,
    pub bytes: u64,
    pub duration_ms: u64,
    /// Unix ms
    pub finished_at: i64,
}

pub struct StatsTracker {
    stats: RwLock<SyncStats>,
    store: Arc<dyn PersistenceAdapter>,
}

impl StatsTracker {
    pub async fn load(store: Arc<dyn PersistenceAdapter>) -> Result<Self> {
        let stats = load_json(store.as_ref(), StorageKey::Stats)
            .await?
            .unwrap_or_default();
        Ok(Self {
            stats: RwLock::new(stats),
            store,
        })
    }

    pub async fn get(&self) -> SyncStats {
        self.stats.read().await.clone()
    }

    /// Fold a finished session into the counters and persist them
    pub async fn record_session(
        &self,
        report: SessionReport,
        items: &[SyncItem],
        conflicts_pending: usize,
    ) -> SyncStats {
        let count = |status: SyncStatus| items.iter().filter(|item| item.status == status).count();

        let mut stats = self.stats.write().await;
        stats.last_sync = Some(report.finished_at);
        stats.pending_changes = count(SyncStatus::Pending);
        stats.failed_changes = count(SyncStatus::Failed);
        stats.total_synced = stats.total_synced.saturating_add(report.synced);
        stats.bandwidth_used = report.bytes;
        stats.sync_duration = report.duration_ms;
        stats.conflicts_pending = conflicts_pending;

        if let Err(error) = save_json(self.store.as_ref(), StorageKey::Stats, &*stats).await {
            tracing::warn!("Failed to persist sync stats: {error}");
        }
        stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MutationType, NewSyncItem, Priority};
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn item_with(status: SyncStatus) -> SyncItem {
        let mut item = SyncItem::from_new(
            NewSyncItem::new(MutationType::Create, "animals", json!({}), Priority::Low),
            1,
        );
        item.status = status;
        item
    }

    #[tokio::test]
    async fn record_session_accumulates_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let tracker = StatsTracker::load(store.clone()).await.unwrap();
        let items = [
            item_with(SyncStatus::Pending),
            item_with(SyncStatus::Pending),
            item_with(SyncStatus::Failed),
            item_with(SyncStatus::Conflicted),
        ];

        tracker
            .record_session(
                SessionReport {
                    synced: 3,
                    bytes: 900,
                    duration_ms: 40,
                    finished_at: 1_000,
                },
                &items,
                1,
            )
            .await;
        let stats = tracker
            .record_session(
                SessionReport {
                    synced: 2,
                    bytes: 120,
                    duration_ms: 15,
                    finished_at: 2_000,
                },
                &items[..1],
                0,
            )
            .await;

        assert_eq!(
            stats,
            SyncStats {
                last_sync: Some(2_000),
                pending_changes: 1,
                failed_changes: 0,
                total_synced: 5,
                bandwidth_used: 120,
                sync_duration: 15,
                conflicts_pending: 0,
            }
        );

        let reloaded = StatsTracker::load(store).await.unwrap();
        assert_eq!(reloaded.get().await, stats);
    }
}
