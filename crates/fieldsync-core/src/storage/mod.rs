//! Persistence adapters for queue, conflict, stats, and preference blobs.

mod libsql_store;
mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::Result;

pub use libsql_store::LibSqlStore;
pub use memory::MemoryStore;

/// Durable get/set of JSON blobs by key.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Load the blob stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Replace the blob stored under `key`.
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Keys owned by the sync engine; each is persisted independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKey {
    Queue,
    Conflicts,
    Stats,
    Preferences,
}

impl StorageKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "sync_queue",
            Self::Conflicts => "sync_conflicts",
            Self::Stats => "sync_stats",
            Self::Preferences => "sync_preferences",
        }
    }
}

/// Key of the locally stored copy of one entity record.
pub fn record_key(entity: &str, record_id: &str) -> String {
    format!("record:{entity}:{record_id}")
}

/// Load and decode a typed blob.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn PersistenceAdapter,
    key: StorageKey,
) -> Result<Option<T>> {
    match store.get(key.as_str()).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and store a typed blob.
pub async fn save_json<T: Serialize + Sync>(
    store: &dyn PersistenceAdapter,
    key: StorageKey,
    value: &T,
) -> Result<()> {
    store.set(key.as_str(), serde_json::to_value(value)?).await
}
