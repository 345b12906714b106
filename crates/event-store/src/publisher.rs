//! Best-effort notification of appended events.

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::broadcast;

use crate::{EventEnvelope, EventStoreError, EventStream, Result};

/// Default capacity of the broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Side channel notified after events are durably appended.
///
/// Failures are reported to the caller but never undo the append.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one stored event.
    async fn publish(&self, event: &EventEnvelope) -> Result<()>;
}

/// In-process publisher backed by a tokio broadcast channel.
///
/// Slow subscribers lag and lose events; publishing without subscribers
/// is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<EventEnvelope>,
}

impl BroadcastPublisher {
    /// Creates a publisher with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a publisher buffering at most `capacity` events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribes to events published from now on.
    ///
    /// A lagging subscriber receives a `PublishFailed` item reporting how
    /// many events it missed, then continues with the newest ones.
    pub fn subscribe(&self) -> EventStream {
        let receiver = self.sender.subscribe();
        Box::pin(stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((Ok(event), receiver)),
                Err(broadcast::error::RecvError::Lagged(missed)) => Some((
                    Err(EventStoreError::PublishFailed(format!(
                        "subscriber lagged, {missed} events dropped"
                    ))),
                    receiver,
                )),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        }))
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &EventEnvelope) -> Result<()> {
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(event.clone())
            .map(|_| ())
            .map_err(|e| EventStoreError::PublishFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateRef;
    use futures_util::StreamExt;

    fn event(n: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("Test")
            .aggregate(&AggregateRef::new("ServerGroup", "app"))
            .payload_raw(serde_json::json!({ "n": n }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let publisher = BroadcastPublisher::new();
        assert!(publisher.publish(&event(1)).await.is_ok());
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let publisher = BroadcastPublisher::new();
        let mut subscription = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.publish(&event(1)).await.unwrap();
        publisher.publish(&event(2)).await.unwrap();

        let first = subscription.next().await.unwrap().unwrap();
        let second = subscription.next().await.unwrap().unwrap();
        assert_eq!(first.payload["n"], 1);
        assert_eq!(second.payload["n"], 2);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_what_it_missed() {
        let publisher = BroadcastPublisher::with_capacity(1);
        let mut subscription = publisher.subscribe();

        publisher.publish(&event(1)).await.unwrap();
        publisher.publish(&event(2)).await.unwrap();

        assert!(matches!(
            subscription.next().await,
            Some(Err(EventStoreError::PublishFailed(_)))
        ));
        let latest = subscription.next().await.unwrap().unwrap();
        assert_eq!(latest.payload["n"], 2);
    }
}
