//! Aggregate sync health counters

use serde::{Deserialize, Serialize};

/// Sync health counters, recomputed at the end of each session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStats {
    /// End of the most recent session (Unix ms)
    pub last_sync: Option<i64>,
    pub pending_changes: usize,
    /// Items whose retries are exhausted
    pub failed_changes: usize,
    /// Items accepted by the remote across all sessions
    pub total_synced: u64,
    /// Bytes sent during the most recent session
    pub bandwidth_used: u64,
    /// Wall-clock length of the most recent session in milliseconds
    pub sync_duration: u64,
    pub conflicts_pending: usize,
}
