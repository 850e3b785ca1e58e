//! Durable, ordered queue of pending mutations.
//!
//! Every mutation updates memory and writes the whole queue through to the
//! persistence adapter under one lock, then publishes `QueueUpdated`. A failed
//! write is logged; the next mutation writes the full snapshot again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::PreferencesStore;
use crate::config::EngineConfig;
use crate::events::{EventBus, SyncEvent};
use crate::models::{NewSyncItem, SyncItem, SyncItemId, SyncStatus};
use crate::storage::{load_json, save_json, PersistenceAdapter, StorageKey};
use crate::util::unix_millis_now;
use crate::{Error, Result};

pub struct SyncQueue {
    items: RwLock<Vec<SyncItem>>,
    store: Arc<dyn PersistenceAdapter>,
    events: EventBus,
    preferences: Arc<PreferencesStore>,
    config: EngineConfig,
}

impl SyncQueue {
    /// Load the persisted queue.
    ///
    /// Items left `syncing` by a crashed process go back to `pending`; their
    /// network call never got a definitive answer.
    pub async fn load(
        store: Arc<dyn PersistenceAdapter>,
        events: EventBus,
        preferences: Arc<PreferencesStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let mut items: Vec<SyncItem> = load_json(store.as_ref(), StorageKey::Queue)
            .await?
            .unwrap_or_default();

        let mut recovered = 0usize;
        for item in &mut items {
            if item.status == SyncStatus::Syncing {
                item.status = SyncStatus::Pending;
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::warn!(recovered, "Reset interrupted sync items to pending");
        }
        tracing::debug!(items = items.len(), "Loaded sync queue");

        Ok(Self {
            items: RwLock::new(items),
            store,
            events,
            preferences,
            config,
        })
    }

    /// Append a new pending mutation stamped with the current time.
    pub async fn enqueue(&self, item: NewSyncItem) -> Result<SyncItem> {
        self.enqueue_at(item, unix_millis_now()).await
    }

    /// Append a mutation recorded at `timestamp` (Unix ms), e.g. one captured
    /// by another component while the queue was unavailable.
    pub async fn enqueue_at(&self, item: NewSyncItem, timestamp: i64) -> Result<SyncItem> {
        item.validate()?;
        let item = SyncItem::from_new(item, timestamp);

        let mut items = self.items.write().await;
        items.push(item.clone());
        self.commit(&items).await;
        drop(items);

        tracing::info!(
            id = %item.id,
            entity = %item.entity,
            mutation = item.mutation.label(),
            priority = item.priority.label(),
            "Enqueued mutation"
        );
        Ok(item)
    }

    /// Pending items that are due, in configured priority order then FIFO.
    ///
    /// Derived fresh on every call; preferences may change between sessions.
    pub async fn dequeue_sorted(&self) -> Vec<SyncItem> {
        let preferences = self.preferences.get();
        let now = unix_millis_now();

        let mut pending = self
            .items
            .read()
            .await
            .iter()
            .filter(|item| item.status == SyncStatus::Pending && item.is_due(now))
            .cloned()
            .collect::<Vec<_>>();

        pending.sort_by(|left, right| {
            preferences
                .priority_rank(left.priority)
                .cmp(&preferences.priority_rank(right.priority))
                .then(left.timestamp.cmp(&right.timestamp))
        });
        pending
    }

    /// Mark a pending item as in flight. Returns `None` if it is gone or no
    /// longer pending.
    pub async fn mark_syncing(&self, id: SyncItemId) -> Option<SyncItem> {
        self.update_item(id, |item| {
            if item.status != SyncStatus::Pending {
                return false;
            }
            item.status = SyncStatus::Syncing;
            true
        })
        .await
    }

    /// Remove an item after the remote confirmed it.
    pub async fn remove(&self, id: SyncItemId) -> Option<SyncItem> {
        let mut items = self.items.write().await;
        let index = items.iter().position(|item| item.id == id)?;
        let removed = items.remove(index);
        self.commit(&items).await;
        Some(removed)
    }

    /// Record a failed attempt.
    ///
    /// Below `max_retries` the item returns to `pending` (after a backoff
    /// delay when configured); at the limit it becomes a terminal `failed`
    /// and `ItemFailed` is published.
    pub async fn mark_failed(&self, id: SyncItemId, error: &str) -> Option<SyncItem> {
        let max_retries = self.preferences.get().max_retries;
        let now = unix_millis_now();
        let config = self.config;

        let updated = self
            .update_item(id, |item| {
                item.retry_count = item.retry_count.saturating_add(1);
                item.last_error = Some(error.to_string());
                if item.retry_count >= max_retries {
                    item.status = SyncStatus::Failed;
                    item.next_attempt_at = None;
                } else {
                    item.status = SyncStatus::Pending;
                    let delay = config.retry_delay(item.retry_count);
                    item.next_attempt_at =
                        (delay > Duration::ZERO).then(|| now.saturating_add(duration_millis(delay)));
                }
                true
            })
            .await?;

        if updated.status == SyncStatus::Failed {
            tracing::warn!(
                id = %updated.id,
                entity = %updated.entity,
                retries = updated.retry_count,
                "Mutation failed permanently: {error}"
            );
            self.events.publish(SyncEvent::ItemFailed(updated.clone()));
        } else {
            tracing::debug!(
                id = %updated.id,
                retries = updated.retry_count,
                "Mutation attempt failed: {error}"
            );
        }
        Some(updated)
    }

    /// Hold an item while its conflict awaits resolution.
    pub async fn mark_conflicted(&self, id: SyncItemId) -> Option<SyncItem> {
        self.update_item(id, |item| {
            item.status = SyncStatus::Conflicted;
            item.next_attempt_at = None;
            true
        })
        .await
    }

    /// Give a terminally failed item a fresh set of attempts.
    pub async fn retry(&self, id: SyncItemId) -> Result<SyncItem> {
        let current = self
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("sync item {id}")))?;
        if current.status != SyncStatus::Failed {
            return Err(Error::InvalidInput(format!(
                "sync item {id} is {}, only failed items can be retried",
                current.status
            )));
        }

        self.update_item(id, |item| {
            item.status = SyncStatus::Pending;
            item.retry_count = 0;
            item.last_error = None;
            item.next_attempt_at = None;
            true
        })
        .await
        .ok_or_else(|| Error::NotFound(format!("sync item {id}")))
    }

    pub async fn get(&self, id: SyncItemId) -> Option<SyncItem> {
        self.items
            .read()
            .await
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    /// Snapshot of every queued item in insertion order.
    pub async fn list(&self) -> Vec<SyncItem> {
        self.items.read().await.clone()
    }

    /// Apply `apply` to one item; commit only when it reports a change.
    async fn update_item(
        &self,
        id: SyncItemId,
        apply: impl FnOnce(&mut SyncItem) -> bool,
    ) -> Option<SyncItem> {
        let mut items = self.items.write().await;
        let item = items.iter_mut().find(|item| item.id == id)?;
        if !apply(item) {
            return None;
        }
        let updated = item.clone();
        self.commit(&items).await;
        Some(updated)
    }

    /// Persist and publish while the write lock is still held.
    async fn commit(&self, items: &[SyncItem]) {
        if let Err(error) = save_json(self.store.as_ref(), StorageKey::Queue, &items).await {
            tracing::warn!("Failed to persist sync queue: {error}");
        }
        self.events.publish(SyncEvent::QueueUpdated(items.to_vec()));
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
