//! Queued mutation model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a queued mutation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncItemId(Uuid);

impl SyncItemId {
    /// Create a new unique item ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of mutation being replayed against the remote endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationType {
    Create,
    Update,
    Delete,
}

impl MutationType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Whether the mutation addresses an existing record and needs its id
    pub const fn targets_existing(self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MutationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unknown mutation type '{other}'"
            ))),
        }
    }
}

/// Priority level of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(Error::InvalidInput(format!("unknown priority '{other}'"))),
        }
    }
}

/// Lifecycle state of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Waiting for the next session
    Pending,
    /// Currently being sent to the remote endpoint
    Syncing,
    /// Accepted remotely; removed from the queue right after
    Completed,
    /// Retries exhausted; kept for the user to inspect
    Failed,
    /// Held until its recorded conflict is resolved
    Conflicted,
}

impl SyncStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Conflicted => "conflicted",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Mutation submitted by the host before the queue assigns bookkeeping fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSyncItem {
    #[serde(rename = "type")]
    pub mutation: MutationType,
    pub entity: String,
    pub data: Value,
    pub priority: Priority,
}

impl NewSyncItem {
    pub fn new(
        mutation: MutationType,
        entity: impl Into<String>,
        data: Value,
        priority: Priority,
    ) -> Self {
        Self {
            mutation,
            entity: entity.into(),
            data,
            priority,
        }
    }

    /// Check the mutation can be addressed once it reaches the remote endpoint
    pub fn validate(&self) -> Result<()> {
        if self.entity.trim().is_empty() {
            return Err(Error::InvalidInput(
                "entity name cannot be empty".to_string(),
            ));
        }
        if self.mutation.targets_existing() && record_id_of(&self.data).is_none() {
            return Err(Error::InvalidInput(format!(
                "{} mutation for '{}' requires a record id in data.id",
                self.mutation, self.entity
            )));
        }
        Ok(())
    }
}

/// A mutation waiting in the sync queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: SyncItemId,
    #[serde(rename = "type")]
    pub mutation: MutationType,
    pub entity: String,
    pub data: Value,
    pub priority: Priority,
    pub status: SyncStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Creation timestamp (Unix ms)
    pub timestamp: i64,
    /// Earliest time the item may be attempted again (Unix ms)
    #[serde(default)]
    pub next_attempt_at: Option<i64>,
}

impl SyncItem {
    /// Build a pending item from a submitted mutation
    #[must_use]
    pub fn from_new(item: NewSyncItem, timestamp: i64) -> Self {
        Self {
            id: SyncItemId::new(),
            mutation: item.mutation,
            entity: item.entity.trim().to_string(),
            data: item.data,
            priority: item.priority,
            status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
            timestamp,
            next_attempt_at: None,
        }
    }

    /// Identifier of the record this mutation targets, if the payload carries one
    #[must_use]
    pub fn record_id(&self) -> Option<String> {
        record_id_of(&self.data)
    }

    /// Whether the item is due for an attempt at `now_ms`
    #[must_use]
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now_ms)
    }
}

/// Extract a record id from `data.id` (string or number)
pub fn record_id_of(data: &Value) -> Option<String> {
    match data.get("id")? {
        Value::String(id) => {
            let id = id.trim();
            (!id.is_empty()).then(|| id.to_string())
        }
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
