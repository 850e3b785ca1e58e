//! Queue, conflict, scheduling, and accounting components of the sync engine.

mod conflict;
mod preferences;
mod queue;
mod scheduler;
mod stats;
#[cfg(test)]
pub(crate) mod test_support;
mod throttle;

pub use conflict::{ConflictResolver, MergeFn};
pub use preferences::PreferencesStore;
pub use queue::SyncQueue;
pub use scheduler::{SessionState, SyncOutcome, SyncScheduler};
pub use stats::{SessionReport, StatsTracker};
pub use throttle::BandwidthThrottle;
