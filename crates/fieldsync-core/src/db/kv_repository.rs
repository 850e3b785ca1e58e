//! Key/value blob repository implementation

use crate::error::Result;
use crate::util::unix_millis_now;
use libsql::Connection;

/// Trait for raw blob storage operations (async)
#[allow(async_fn_in_trait)]
pub trait KvRepository {
    /// Load the blob stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace the blob stored under `key`
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// libSQL implementation of `KvRepository`
pub struct LibSqlKvRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlKvRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl KvRepository for LibSqlKvRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv_store WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                libsql::params![key, value, unix_millis_now()],
            )
            .await?;
        Ok(())
    }
}
