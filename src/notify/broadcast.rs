//! In-process notifier backed by a tokio broadcast channel.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::TransportError;
use crate::notify::{DispatchEvent, Notifier, Topic};

/// In-process pub/sub. Every published event is broadcast as a
/// `(topic, event)` pair; subscribers filter by topic themselves.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<(String, DispatchEvent)>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all published events.
    pub fn subscribe(&self) -> broadcast::Receiver<(String, DispatchEvent)> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish(&self, topic: Topic, event: &DispatchEvent) -> Result<(), TransportError> {
        debug!(topic = %topic, "Publishing dispatch event");
        // Ok if no receivers are listening yet.
        let _ = self.tx.send((topic.to_string(), event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        let worker_id = Uuid::new_v4();
        let event = DispatchEvent::CrewDeployed {
            request_id: Uuid::new_v4(),
            worker_ids: vec![worker_id],
        };
        notifier
            .publish(Topic::Worker(worker_id), &event)
            .await
            .unwrap();

        let (topic, received) = rx.recv().await.unwrap();
        assert_eq!(topic, format!("worker/{worker_id}"));
        assert!(matches!(received, DispatchEvent::CrewDeployed { .. }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::new(8);
        let event = DispatchEvent::CrewDeployed {
            request_id: Uuid::new_v4(),
            worker_ids: vec![],
        };
        assert!(
            notifier
                .publish(Topic::Customer(Uuid::new_v4()), &event)
                .await
                .is_ok()
        );
    }
}
