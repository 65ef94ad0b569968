//! Event bus port — publish/subscribe for queue events.

use std::future::Future;

use actionq_domain::error::QueueError;
use actionq_domain::event::QueueEvent;

/// Publishes queue events to interested subscribers.
pub trait EventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: QueueEvent) -> impl Future<Output = Result<(), QueueError>> + Send;
}

impl<T: EventPublisher + Send + Sync> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: QueueEvent) -> impl Future<Output = Result<(), QueueError>> + Send {
        (**self).publish(event)
    }
}
