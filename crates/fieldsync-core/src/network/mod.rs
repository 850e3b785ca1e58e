//! Network reachability as seen by the sync engine.
//!
//! The host platform owns the real reachability notifier; it reports changes
//! into a [`NetworkMonitor`] and the scheduler reacts to transitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Link type reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    #[default]
    None,
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
}

impl ConnectionKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::Ethernet => "ethernet",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ConnectionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "offline" => Ok(Self::None),
            "wifi" => Ok(Self::Wifi),
            "cellular" => Ok(Self::Cellular),
            "ethernet" => Ok(Self::Ethernet),
            "unknown" => Ok(Self::Unknown),
            other => Err(Error::InvalidInput(format!(
                "unknown connection type '{other}'"
            ))),
        }
    }
}

/// Snapshot of connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkState {
    pub connected: bool,
    pub kind: ConnectionKind,
}

impl NetworkState {
    pub const fn offline() -> Self {
        Self {
            connected: false,
            kind: ConnectionKind::None,
        }
    }

    pub const fn online(kind: ConnectionKind) -> Self {
        Self {
            connected: true,
            kind,
        }
    }

    pub const fn is_cellular(&self) -> bool {
        self.connected && matches!(self.kind, ConnectionKind::Cellular)
    }
}

/// Source of connectivity state and change notifications
pub trait NetworkMonitor: Send + Sync {
    fn current_state(&self) -> NetworkState;

    /// Receiver that observes every state change; drop it to unsubscribe
    fn subscribe(&self) -> watch::Receiver<NetworkState>;
}

/// Monitor fed by the host through [`ManualNetworkMonitor::set_state`]
pub struct ManualNetworkMonitor {
    state: watch::Sender<NetworkState>,
}

impl ManualNetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    /// Report a new state; subscribers are woken only when it differs
    pub fn set_state(&self, next: NetworkState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::debug!(
                connected = next.connected,
                kind = next.kind.label(),
                "Network state changed"
            );
        }
    }
}

impl NetworkMonitor for ManualNetworkMonitor {
    fn current_state(&self) -> NetworkState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state.subscribe()
    }
}
