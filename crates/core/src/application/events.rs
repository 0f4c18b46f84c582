// Event bus - fire-and-forget fan-out of lifecycle events

use crate::domain::QueueEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Default buffered events per subscriber before slow listeners start lagging
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// In-process publisher for [`QueueEvent`]s.
///
/// Delivery is best-effort: with no subscribers events are dropped, and a
/// subscriber that falls behind skips ahead (`RecvError::Lagged`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: QueueEvent) {
        debug!(kind = event.kind(), queue = event.queue(), "Publishing event");
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
