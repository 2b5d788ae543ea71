use super::types::{PublishedEvent, WorkflowEvent};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::trace;

/// Fan-out publisher for workflow and recovery events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Having no subscribers is not an error; events are simply dropped.
    pub fn publish(&self, event: WorkflowEvent) {
        let name = event.name();
        let published = PublishedEvent {
            event,
            published_at: Utc::now(),
        };

        match self.sender.send(published) {
            Ok(receivers) => trace!(event = name, receivers, "Published event"),
            Err(broadcast::error::SendError(_)) => {
                trace!(event = name, "Published event with no subscribers");
            }
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receive-side failures, convertible from `broadcast::error::RecvError`
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Subscriber lagged behind by {0} events")]
    Lagged(u64),
}

impl From<broadcast::error::RecvError> for PublishError {
    fn from(error: broadcast::error::RecvError) -> Self {
        match error {
            broadcast::error::RecvError::Closed => PublishError::ChannelClosed,
            broadcast::error::RecvError::Lagged(skipped) => PublishError::Lagged(skipped),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000) // Default capacity of 1000 events
    }
}
