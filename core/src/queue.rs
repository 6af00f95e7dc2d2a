//! Message queue contract with explicit per-delivery acknowledgment.
//!
//! Acknowledgment is decoupled from receipt: a delivery is acked only after
//! the handler decides its fate, so an unacked message survives a crash and
//! is redelivered. Consumers must therefore be idempotent.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the message queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Could not reach the broker.
    #[error("queue connection failed: {0}")]
    ConnectionFailed(String),

    /// A publish did not reach the broker.
    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailed {
        /// Target topic.
        topic: String,
        /// Broker-reported cause.
        reason: String,
    },

    /// A subscription could not be established.
    #[error("subscription to '{topic}' failed: {reason}")]
    SubscriptionFailed {
        /// Target topic.
        topic: String,
        /// Broker-reported cause.
        reason: String,
    },

    /// A payload could not be serialized for publishing.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// An acknowledgment could not be recorded at the broker.
    #[error("ack failed: {0}")]
    AckFailed(String),

    /// The underlying transport reported an error mid-stream.
    #[error("transport error: {0}")]
    TransportError(String),
}

/// Consumes itself to record the acknowledgment at the broker.
pub trait AckHandle: Send {
    /// Acknowledges the delivery. Not calling this leaves the message
    /// eligible for redelivery.
    fn ack(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>>;
}

/// One received message paired with its acknowledgment handle.
pub struct Delivery {
    payload: Vec<u8>,
    ack: Box<dyn AckHandle>,
}

impl Delivery {
    /// Pairs a payload with its ack handle.
    #[must_use]
    pub fn new(payload: Vec<u8>, ack: Box<dyn AckHandle>) -> Self {
        Self { payload, ack }
    }

    /// The raw message bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledges the delivery, consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] (or a transport error) when the
    /// broker did not record the acknowledgment.
    pub async fn ack(self) -> Result<(), QueueError> {
        self.ack.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, QueueError>> + Send>>;

/// Boxed future alias for the trait methods below.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Publish/subscribe over the broker.
pub trait MessageQueue: Send + Sync {
    /// Publishes `payload` to `topic`. Messages sharing a `key` are
    /// delivered in publish order.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> QueueFuture<'a, ()>;

    /// Opens a subscription on `topic`.
    fn subscribe<'a>(&'a self, topic: &'a str) -> QueueFuture<'a, DeliveryStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAck;

    impl AckHandle for NoopAck {
        fn ack(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn delivery_exposes_payload_and_acks() {
        let delivery = Delivery::new(b"hello".to_vec(), Box::new(NoopAck));
        assert_eq!(delivery.payload(), b"hello");
        assert!(delivery.ack().await.is_ok());
    }
}
