//! Data models for fieldsync

mod preferences;
mod stats;
mod sync_conflict;
mod sync_item;

pub use preferences::{ConflictStrategy, PreferencesPatch, SyncPreferences};
pub use stats::SyncStats;
pub use sync_conflict::{ConflictId, Resolution, SyncConflict};
pub use sync_item::{
    record_id_of, MutationType, NewSyncItem, Priority, SyncItem, SyncItemId, SyncStatus,
};
