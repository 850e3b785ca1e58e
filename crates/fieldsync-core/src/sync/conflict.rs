//! Conflict recording and resolution.
//!
//! A conflict holds its queue item in `conflicted` until one side wins. The
//! item leaves the queue only once the winning data has been applied: a
//! forced push for `local` and `merge`, a local record write for `remote`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::SyncQueue;
use crate::config::EngineConfig;
use crate::events::{EventBus, SyncEvent};
use crate::models::{
    record_id_of, ConflictId, ConflictStrategy, MutationType, Resolution, SyncConflict,
    SyncItem,
};
use crate::remote::{RemoteEndpoint, RemoteOutcome, RemoteRequest};
use crate::storage::{load_json, record_key, save_json, PersistenceAdapter, StorageKey};
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Combines `(local, remote)` into the version both sides should converge on
pub type MergeFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

pub struct ConflictResolver {
    conflicts: RwLock<Vec<SyncConflict>>,
    merges: StdRwLock<HashMap<String, MergeFn>>,
    store: Arc<dyn PersistenceAdapter>,
    remote: Arc<dyn RemoteEndpoint>,
    queue: Arc<SyncQueue>,
    events: EventBus,
    config: EngineConfig,
    resolve_lock: Mutex<()>,
}

impl ConflictResolver {
    pub async fn load(
        store: Arc<dyn PersistenceAdapter>,
        remote: Arc<dyn RemoteEndpoint>,
        queue: Arc<SyncQueue>,
        events: EventBus,
        config: EngineConfig,
    ) -> Result<Self> {
        let conflicts: Vec<SyncConflict> = load_json(store.as_ref(), StorageKey::Conflicts)
            .await?
            .unwrap_or_default();
        tracing::debug!(conflicts = conflicts.len(), "Loaded sync conflicts");

        Ok(Self {
            conflicts: RwLock::new(conflicts),
            merges: StdRwLock::new(HashMap::new()),
            store,
            remote,
            queue,
            events,
            config,
            resolve_lock: Mutex::new(()),
        })
    }

    /// Register the merge function used for `entity`, replacing any earlier one
    pub fn register_merge(&self, entity: impl Into<String>, merge: MergeFn) {
        let entity = entity.into();
        tracing::debug!(entity = %entity, "Registered merge function");
        self.merges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity, merge);
    }

    fn merge_fn(&self, entity: &str) -> Option<MergeFn> {
        self.merges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity)
            .cloned()
    }

    /// Record a conflict reported by the remote for `item`.
    pub async fn record(&self, item: &SyncItem, remote_version: Value) -> SyncConflict {
        let conflict = SyncConflict {
            id: ConflictId::new(),
            item_id: item.id,
            mutation: item.mutation,
            entity: item.entity.clone(),
            local_version: item.data.clone(),
            remote_version,
            resolution: None,
            resolved_at: None,
            detected_at: unix_millis_now(),
        };

        let mut conflicts = self.conflicts.write().await;
        conflicts.push(conflict.clone());
        self.persist(&conflicts).await;
        drop(conflicts);

        self.queue.mark_conflicted(item.id).await;
        tracing::info!(
            conflict = %conflict.id,
            item = %item.id,
            entity = %conflict.entity,
            "Sync conflict detected"
        );
        self.events
            .publish(SyncEvent::ConflictDetected(conflict.clone()));
        conflict
    }

    pub async fn list(&self) -> Vec<SyncConflict> {
        self.conflicts.read().await.clone()
    }

    pub async fn get(&self, id: ConflictId) -> Option<SyncConflict> {
        self.conflicts
            .read()
            .await
            .iter()
            .find(|conflict| conflict.id == id)
            .cloned()
    }

    pub async fn unresolved_count(&self) -> usize {
        self.conflicts
            .read()
            .await
            .iter()
            .filter(|conflict| !conflict.is_resolved())
            .count()
    }

    /// Resolve a conflict in favour of `resolution`.
    ///
    /// Resolving an already-resolved conflict returns the stored record
    /// without touching data again. When applying the winner fails the
    /// conflict stays open and the error is returned.
    pub async fn resolve(&self, id: ConflictId, resolution: Resolution) -> Result<SyncConflict> {
        let _guard = self.resolve_lock.lock().await;

        let conflict = self
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;
        if conflict.is_resolved() {
            tracing::debug!(conflict = %id, "Conflict already resolved");
            return Ok(conflict);
        }

        match resolution {
            Resolution::Local => {
                self.push_forced(
                    conflict.mutation,
                    &conflict,
                    conflict.local_version.clone(),
                )
                .await?;
            }
            Resolution::Remote => {
                self.write_local(&conflict, &conflict.remote_version).await?;
            }
            Resolution::Merge => {
                let merge = self
                    .merge_fn(&conflict.entity)
                    .ok_or_else(|| Error::MergeUnavailable(conflict.entity.clone()))?;
                let merged = merge(&conflict.local_version, &conflict.remote_version);
                // The merged record replaces the remote one, even over a local delete
                let mutation = match conflict.mutation {
                    MutationType::Delete => MutationType::Update,
                    mutation => mutation,
                };
                self.push_forced(mutation, &conflict, merged.clone()).await?;
                self.write_local(&conflict, &merged).await?;
            }
        }

        let resolved = {
            let mut conflicts = self.conflicts.write().await;
            let Some(stored) = conflicts.iter_mut().find(|stored| stored.id == id) else {
                return Err(Error::NotFound(format!("conflict {id}")));
            };
            stored.resolution = Some(resolution);
            stored.resolved_at = Some(unix_millis_now());
            let resolved = stored.clone();
            self.persist(&conflicts).await;
            resolved
        };

        self.queue.remove(resolved.item_id).await;
        tracing::info!(
            conflict = %id,
            entity = %resolved.entity,
            resolution = resolution.label(),
            "Sync conflict resolved"
        );
        self.events
            .publish(SyncEvent::ConflictResolved(resolved.clone()));
        Ok(resolved)
    }

    /// Apply `strategy` to every open conflict; returns how many were resolved.
    ///
    /// `prompt` leaves everything open, as does `merge` for entities without
    /// a registered merge function.
    pub async fn sweep(&self, strategy: ConflictStrategy) -> usize {
        let pending = self
            .conflicts
            .read()
            .await
            .iter()
            .filter(|conflict| !conflict.is_resolved())
            .map(|conflict| (conflict.id, conflict.entity.clone()))
            .collect::<Vec<_>>();

        let mut resolved = 0;
        for (id, entity) in pending {
            let resolution = match strategy {
                ConflictStrategy::Local => Resolution::Local,
                ConflictStrategy::Remote => Resolution::Remote,
                ConflictStrategy::Merge if self.merge_fn(&entity).is_some() => Resolution::Merge,
                ConflictStrategy::Merge | ConflictStrategy::Prompt => continue,
            };
            match self.resolve(id, resolution).await {
                Ok(_) => resolved += 1,
                Err(error) => tracing::warn!(
                    conflict = %id,
                    entity = %entity,
                    "Automatic conflict resolution failed: {error}"
                ),
            }
        }
        resolved
    }

    /// Drop resolved conflicts resolved at least `older_than` ago.
    pub async fn prune_resolved(&self, older_than: Duration) -> usize {
        let age_ms = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let cutoff = unix_millis_now().saturating_sub(age_ms);

        let mut conflicts = self.conflicts.write().await;
        let before = conflicts.len();
        conflicts.retain(|conflict| conflict.resolved_at.is_none_or(|at| at > cutoff));
        let pruned = before - conflicts.len();
        if pruned > 0 {
            self.persist(&conflicts).await;
            tracing::debug!(pruned, "Pruned resolved conflicts");
        }
        pruned
    }

    async fn push_forced(
        &self,
        mutation: MutationType,
        conflict: &SyncConflict,
        body: Value,
    ) -> Result<()> {
        let request = RemoteRequest::new(mutation, conflict.entity.clone(), body).forced();
        let outcome = tokio::time::timeout(self.config.item_timeout(), self.remote.send(&request))
            .await
            .map_err(|_| {
                Error::Remote(format!(
                    "forced push timed out after {} ms",
                    self.config.item_timeout_ms
                ))
            })?;

        match outcome {
            RemoteOutcome::Accepted => Ok(()),
            RemoteOutcome::Conflict { .. } => Err(Error::Remote(
                "remote rejected the forced push with another conflict".to_string(),
            )),
            RemoteOutcome::Failed { message } => Err(Error::Remote(message)),
        }
    }

    async fn write_local(&self, conflict: &SyncConflict, value: &Value) -> Result<()> {
        let record_id = record_id_of(&conflict.remote_version)
            .or_else(|| record_id_of(&conflict.local_version))
            .unwrap_or_else(|| conflict.item_id.as_str());
        self.store
            .set(&record_key(&conflict.entity, &record_id), value.clone())
            .await
    }

    async fn persist(&self, conflicts: &[SyncConflict]) {
        if let Err(error) = save_json(self.store.as_ref(), StorageKey::Conflicts, &conflicts).await
        {
            tracing::warn!("Failed to persist sync conflicts: {error}");
        }
    }
}
