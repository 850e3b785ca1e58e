//! fieldsync-core - offline-first synchronization engine
//!
//! Local mutations are queued durably while the device is offline and
//! replayed against a remote service once connectivity allows. Conflicts,
//! retries, bandwidth limits, and session statistics are handled here; hosts
//! provide storage, network, and remote collaborators through the traits in
//! [`storage`], [`network`], and [`remote`].

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod network;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod util;

pub use config::EngineConfig;
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use events::{EventBus, SyncEvent};
pub use models::{
    ConflictId, ConflictStrategy, MutationType, NewSyncItem, PreferencesPatch, Priority,
    Resolution, SyncConflict, SyncItem, SyncItemId, SyncPreferences, SyncStats, SyncStatus,
};
pub use sync::{MergeFn, SyncOutcome};
