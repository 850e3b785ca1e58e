//! Persisted sync policy with change notification.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::models::{PreferencesPatch, SyncPreferences};
use crate::storage::{load_json, save_json, PersistenceAdapter, StorageKey};
use crate::Result;

/// Owner of `SyncPreferences`; the scheduler watches it to reschedule auto-sync
pub struct PreferencesStore {
    current: watch::Sender<SyncPreferences>,
    store: Arc<dyn PersistenceAdapter>,
    update_lock: Mutex<()>,
}

impl PreferencesStore {
    pub async fn load(store: Arc<dyn PersistenceAdapter>) -> Result<Self> {
        let loaded: Option<SyncPreferences> =
            load_json(store.as_ref(), StorageKey::Preferences).await?;
        let preferences = match loaded {
            Some(preferences) if preferences.validate().is_ok() => preferences,
            Some(_) => {
                tracing::warn!("Stored sync preferences are invalid; using defaults");
                SyncPreferences::default()
            }
            None => SyncPreferences::default(),
        };
        let (current, _) = watch::channel(preferences);
        Ok(Self {
            current,
            store,
            update_lock: Mutex::new(()),
        })
    }

    pub fn get(&self) -> SyncPreferences {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncPreferences> {
        self.current.subscribe()
    }

    /// Apply a partial update, persist it, and notify watchers
    pub async fn update(&self, patch: PreferencesPatch) -> Result<SyncPreferences> {
        let _guard = self.update_lock.lock().await;
        let next = self.get().patched(patch)?;

        if let Err(error) = save_json(self.store.as_ref(), StorageKey::Preferences, &next).await {
            tracing::warn!("Failed to persist sync preferences: {error}");
        }
        self.current.send_replace(next.clone());
        tracing::info!(
            auto_sync = next.auto_sync,
            interval_minutes = next.sync_interval,
            strategy = next.conflict_strategy.label(),
            "Sync preferences updated"
        );
        Ok(next)
    }
}
