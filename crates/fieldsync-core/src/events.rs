//! Typed fan-out of sync events to UI and notification layers.

use tokio::sync::broadcast;

use crate::models::{SyncConflict, SyncItem, SyncStats};

/// Everything the engine reports to the outside world
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    SessionStarted,
    SessionCompleted(SyncStats),
    SessionError(String),
    QueueUpdated(Vec<SyncItem>),
    ConflictDetected(SyncConflict),
    ConflictResolved(SyncConflict),
    ItemStarted(SyncItem),
    ItemCompleted(SyncItem),
    ItemFailed(SyncItem),
}

impl SyncEvent {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session-start",
            Self::SessionCompleted(_) => "session-complete",
            Self::SessionError(_) => "session-error",
            Self::QueueUpdated(_) => "queue-updated",
            Self::ConflictDetected(_) => "conflict-detected",
            Self::ConflictResolved(_) => "conflict-resolved",
            Self::ItemStarted(_) => "item-start",
            Self::ItemCompleted(_) => "item-complete",
            Self::ItemFailed(_) => "item-failed",
        }
    }
}

/// Broadcast bus; each subscriber owns its receiver and unsubscribes by dropping it
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; having none is not an error
    pub fn publish(&self, event: SyncEvent) {
        tracing::trace!(event = event.label(), "Publishing sync event");
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_receivers_unsubscribe() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(SyncEvent::SessionStarted);
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::SessionStarted);

        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(SyncEvent::SessionError("offline".to_string()));
    }
}
