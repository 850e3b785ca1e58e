//! In-process blob store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::PersistenceAdapter;
use crate::{Error, Result};

/// Volatile `PersistenceAdapter` for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail, simulating a full or unavailable disk.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every stored key, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys = self.blobs.read().await.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Database(format!("write to '{key}' rejected")));
        }
        self.blobs.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
