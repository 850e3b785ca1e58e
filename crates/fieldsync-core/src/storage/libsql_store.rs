//! libSQL-backed blob store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::PersistenceAdapter;
use crate::db::{Database, KvRepository, LibSqlKvRepository};
use crate::Result;

/// Durable `PersistenceAdapter` over a local libSQL database file.
pub struct LibSqlStore {
    db: Mutex<Database>,
    db_path: Option<PathBuf>,
}

impl LibSqlStore {
    /// Open (or create) the store at `db_path`.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::debug!("Opened sync store at {}", db_path.display());
        Ok(Self {
            db: Mutex::new(db),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open_in_memory().await?),
            db_path: None,
        })
    }

    /// Location of the backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

#[async_trait]
impl PersistenceAdapter for LibSqlStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let db = self.db.lock().await;
        let repo = LibSqlKvRepository::new(db.connection());
        match repo.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let raw = serde_json::to_string(&value)?;
        let db = self.db.lock().await;
        let repo = LibSqlKvRepository::new(db.connection());
        repo.set(key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_set_and_get() {
        let store = LibSqlStore::open_in_memory().await.unwrap();
        assert!(store.path().is_none());

        store
            .set("sync_queue", json!([{"entity": "animals"}]))
            .await
            .unwrap();
        assert_eq!(
            store.get("sync_queue").await.unwrap(),
            Some(json!([{"entity": "animals"}]))
        );
        assert_eq!(store.get("sync_conflicts").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blobs_survive_reopen() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("fieldsync.db");

        {
            let store = LibSqlStore::open_path(&db_path).await.unwrap();
            store
                .set("sync_stats", json!({"total_synced": 4}))
                .await
                .unwrap();
        }

        let reopened = LibSqlStore::open_path(&db_path).await.unwrap();
        assert_eq!(
            reopened.get("sync_stats").await.unwrap(),
            Some(json!({"total_synced": 4}))
        );
    }
}
