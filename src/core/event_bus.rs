//! Fire-and-forget progress notifications.
//!
//! Subscribers receive events published after they subscribed. Publishing
//! with no subscribers is a no-op; a subscriber that falls behind by more
//! than the channel capacity misses the oldest events.

use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::PipelineEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast bus for [`PipelineEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, event: PipelineEvent) {
        trace!(kind = event.kind(), "Publishing event");
        // No receivers is fine
        let _ = self.sender.send(event);
    }
}
