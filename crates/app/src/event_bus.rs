//! In-process event bus backed by a tokio broadcast channel.

use std::future::Future;

use tokio::sync::broadcast;

use actionq_domain::error::QueueError;
use actionq_domain::event::QueueEvent;

use crate::ports::EventPublisher;

/// Fans queue events out to every live subscriber of a [`broadcast`]
/// channel. An event published while nobody listens is dropped.
pub struct InProcessEventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl InProcessEventBus {
    /// `capacity` bounds how far a slow subscriber may lag before it skips.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receiver for the events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(&self, event: QueueEvent) -> impl Future<Output = Result<(), QueueError>> + Send {
        if self.sender.send(event).is_err() {
            tracing::trace!("queue event published without subscribers");
        }
        async { Ok(()) }
    }
}
