//! In-process message bus with fault injection.

use async_trait::async_trait;
use expedientes_env::{BusMessage, EnvError, EventBus, MessageId};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

/// A message as seen by a subscriber.
pub type Delivery = (MessageId, BusMessage);

/// Topic backed by a bounded tokio channel.
///
/// Message IDs are derived from a seed and a sequence number, so a seeded
/// run produces the same IDs every time.
pub struct ChannelBus {
    topic: String,

    tx: mpsc::Sender<Delivery>,

    /// Seed for message IDs
    seed: u64,

    /// Next sequence number
    sequence: AtomicU64,

    /// Publishes still to be rejected with a transient error
    pending_failures: AtomicU32,
}

/// Receiving end of a [`ChannelBus`].
pub struct BusSubscription {
    rx: mpsc::Receiver<Delivery>,
}

impl ChannelBus {
    /// Creates a topic holding at most `capacity` undelivered messages.
    pub fn new(topic: impl Into<String>, capacity: usize, seed: u64) -> (Self, BusSubscription) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let bus = Self {
            topic: topic.into(),
            tx,
            seed,
            sequence: AtomicU64::new(0),
            pending_failures: AtomicU32::new(0),
        };
        (bus, BusSubscription { rx })
    }

    /// Makes the next `count` publishes fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Number of messages accepted so far.
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventBus for ChannelBus {
    async fn publish(&self, message: BusMessage) -> Result<MessageId, EnvError> {
        if self.take_failure() {
            return Err(EnvError::bus("injected publish failure"));
        }

        let permit = self.tx.reserve().await.map_err(|_| EnvError::closed(&self.topic))?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let id = MessageId::from_seed(self.seed.wrapping_mul(0x9e3779b97f4a7c15) ^ sequence);
        trace!(topic = %self.topic, %id, bytes = message.size(), "message accepted");
        permit.send((id, message));
        Ok(id)
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

impl BusSubscription {
    /// Waits for the next message; `None` once the topic is closed and drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Returns a buffered message without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    /// Stops accepting new messages; buffered ones can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_then_receive() {
        let (bus, mut sub) = ChannelBus::new("expedientes", 8, 1);
        let id = bus.publish(BusMessage::json(b"{\"Ref\":\"a\"}".to_vec())).await.unwrap();

        let (received_id, message) = sub.recv().await.unwrap();
        assert_eq!(received_id, id);
        assert_eq!(message.payload, b"{\"Ref\":\"a\"}");
        assert_eq!(bus.published(), 1);
        assert_eq!(bus.topic(), "expedientes");
    }

    #[tokio::test]
    async fn test_seeded_ids_are_reproducible() {
        let (a, _sub_a) = ChannelBus::new("t", 4, 99);
        let (b, _sub_b) = ChannelBus::new("t", 4, 99);

        let first_a = a.publish(BusMessage::json(vec![])).await.unwrap();
        let first_b = b.publish(BusMessage::json(vec![])).await.unwrap();
        let second_a = a.publish(BusMessage::json(vec![])).await.unwrap();

        assert_eq!(first_a, first_b);
        assert_ne!(first_a, second_a);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let (bus, mut sub) = ChannelBus::new("t", 4, 0);
        bus.fail_next(2);

        for _ in 0..2 {
            let err = bus.publish(BusMessage::json(vec![])).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert!(bus.publish(BusMessage::json(vec![])).await.is_ok());
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_closed_subscription_rejects_publish() {
        let (bus, mut sub) = ChannelBus::new("t", 4, 0);
        bus.publish(BusMessage::json(vec![1])).await.unwrap();
        sub.close();

        let err = bus.publish(BusMessage::json(vec![2])).await.unwrap_err();
        assert!(matches!(err, EnvError::BusClosed(_)));
        assert!(!err.is_transient());

        // Buffered message survives the close
        assert_eq!(sub.recv().await.map(|(_, m)| m.payload), Some(vec![1]));
        assert!(sub.recv().await.is_none());
    }
}
