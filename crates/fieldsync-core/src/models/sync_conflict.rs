//! Sync conflict model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{MutationType, SyncItemId};
use crate::error::{Error, Result};

/// A unique identifier for a recorded conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Which side wins once a conflict is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Local version overwrites the remote record
    Local,
    /// Remote version overwrites the local record
    Remote,
    /// Entity-specific merge of both versions
    Merge,
}

impl Resolution {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "merge" => Ok(Self::Merge),
            other => Err(Error::InvalidInput(format!("unknown resolution '{other}'"))),
        }
    }
}

/// Divergence between the queued local mutation and the remote record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: ConflictId,
    /// Queue item whose push was rejected
    pub item_id: SyncItemId,
    /// Mutation replayed when the local side wins
    pub mutation: MutationType,
    pub entity: String,
    pub local_version: Value,
    pub remote_version: Value,
    /// `None` while unresolved
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// Resolution timestamp (Unix ms)
    #[serde(default)]
    pub resolved_at: Option<i64>,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
}

impl SyncConflict {
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolution_parse() {
        assert_eq!("Local".parse::<Resolution>().unwrap(), Resolution::Local);
        assert_eq!(" remote ".parse::<Resolution>().unwrap(), Resolution::Remote);
        assert!("both".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_unresolved_conflict_deserializes_without_resolution() {
        let conflict = SyncConflict {
            id: ConflictId::new(),
            item_id: SyncItemId::new(),
            mutation: MutationType::Update,
            entity: "animals".to_string(),
            local_version: json!({"id": "a1", "weight": 410}),
            remote_version: json!({"id": "a1", "weight": 402}),
            resolution: None,
            resolved_at: None,
            detected_at: 1,
        };
        let raw = serde_json::to_string(&conflict).unwrap();
        let parsed: SyncConflict = serde_json::from_str(&raw).unwrap();
        assert!(!parsed.is_resolved());
        assert_eq!(parsed, conflict);
    }
}
