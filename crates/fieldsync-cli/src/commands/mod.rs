pub mod common;
pub mod completions;
pub mod enqueue;
pub mod list;
pub mod prefs;
pub mod resolve;
pub mod retry;
pub mod stats;
pub mod sync;
pub mod watch;
