//! # Flashsale Redpanda
//!
//! Kafka-protocol implementation of the message queue contract, built on
//! rdkafka. Works against Redpanda, Apache Kafka, or any compatible broker.
//!
//! # Delivery Semantics
//!
//! **At-least-once, commit-after-processing**:
//! - Auto-commit is disabled; each delivery carries an acknowledgment handle
//!   that commits its own offset.
//! - The worker acks only once it has decided the message's fate, so a crash
//!   mid-processing (or a failed dead-letter publish) leaves the offset
//!   uncommitted and the message is redelivered.
//! - Consumers must be idempotent; the pipeline short-circuits on terminal
//!   order status.
//! - Messages sharing a key land on the same partition, which gives
//!   per-product ordering for order intents.

use flashsale_core::queue::QueueFuture;
use flashsale_core::{AckHandle, Delivery, DeliveryStream, MessageQueue, QueueError};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Message queue backed by a Kafka-protocol broker.
///
/// One producer is shared by all publishes; each [`subscribe`] call creates
/// its own consumer in the configured consumer group.
///
/// [`subscribe`]: MessageQueue::subscribe
pub struct RedpandaQueue {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: String,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaQueue {
    /// Creates a queue with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] when the producer cannot be
    /// created.
    pub fn new(brokers: &str, consumer_group: &str) -> Result<Self, QueueError> {
        Self::builder()
            .brokers(brokers)
            .consumer_group(consumer_group)
            .build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaQueueBuilder {
        RedpandaQueueBuilder::default()
    }
}

/// Builder for [`RedpandaQueue`].
#[derive(Default)]
pub struct RedpandaQueueBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaQueueBuilder {
    /// Set the comma-separated broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode ("0", "1", or "all").
    /// Default: "all", since a lost intent is a lost order.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID shared by worker instances.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the in-process delivery buffer size. Default: 1000.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where a new consumer group starts reading ("earliest", "latest").
    /// Default: "earliest", so intents published before the first worker
    /// start are not dropped.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] when brokers or the consumer
    /// group are missing, or when the producer cannot be created.
    pub fn build(self) -> Result<RedpandaQueue, QueueError> {
        let brokers = self
            .brokers
            .ok_or_else(|| QueueError::ConnectionFailed("brokers not configured".to_string()))?;
        let consumer_group = self.consumer_group.ok_or_else(|| {
            QueueError::ConnectionFailed("consumer group not configured".to_string())
        })?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", &acks)
            .create()
            .map_err(|e| {
                QueueError::ConnectionFailed(format!("failed to create producer: {e}"))
            })?;

        tracing::info!(
            brokers = %brokers,
            consumer_group = %consumer_group,
            acks = %acks,
            "queue client created"
        );

        Ok(RedpandaQueue {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        })
    }
}

/// Commits the offset of one delivery when acked.
struct KafkaAck {
    consumer: Arc<StreamConsumer>,
    topic: String,
    partition: i32,
    offset: i64,
}

impl AckHandle for KafkaAck {
    fn ack(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> {
        Box::pin(async move {
            let mut tpl = TopicPartitionList::new();
            // Committed offset points at the NEXT message to consume.
            tpl.add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
                .map_err(|e| QueueError::AckFailed(e.to_string()))?;
            self.consumer
                .commit(&tpl, CommitMode::Async)
                .map_err(|e| QueueError::AckFailed(e.to_string()))?;

            tracing::trace!(
                topic = %self.topic,
                partition = self.partition,
                offset = self.offset,
                "offset committed"
            );
            Ok(())
        })
    }
}

impl MessageQueue for RedpandaQueue {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let record = FutureRecord::to(topic).payload(payload).key(key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(topic, key, partition, offset, "message published");
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic, key, error = %kafka_error, "publish failed");
                    Err(QueueError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> QueueFuture<'a, DeliveryStream> {
        let topic = topic.to_string();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| QueueError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[&topic])
                .map_err(|e| QueueError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %consumer_group,
                auto_offset_reset = %auto_offset_reset,
                "subscribed"
            );

            let consumer = Arc::new(consumer);
            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The task owns the consumer; ack handles keep it alive through
            // the Arc until their offsets are committed.
            tokio::spawn({
                let consumer = Arc::clone(&consumer);
                async move {
                    loop {
                        match consumer.recv().await {
                            Ok(message) => {
                                let payload = message.payload().unwrap_or_default().to_vec();
                                let ack = KafkaAck {
                                    consumer: Arc::clone(&consumer),
                                    topic: message.topic().to_string(),
                                    partition: message.partition(),
                                    offset: message.offset(),
                                };
                                let delivery = Delivery::new(payload, Box::new(ack));
                                if tx.send(Ok(delivery)).await.is_err() {
                                    // Receiver dropped; exit without
                                    // committing anything in flight.
                                    break;
                                }
                            }
                            Err(e) => {
                                let err =
                                    QueueError::TransportError(format!("receive failed: {e}"));
                                if tx.send(Err(err)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    tracing::debug!("consumer task exiting");
                }
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaQueue>();
        assert_sync::<RedpandaQueue>();
    }

    #[test]
    fn builder_requires_brokers_and_group() {
        assert!(RedpandaQueue::builder().build().is_err());
        assert!(RedpandaQueue::builder().brokers("localhost:9092").build().is_err());
        assert!(
            RedpandaQueue::builder()
                .brokers("localhost:9092")
                .consumer_group("flashsale-workers")
                .build()
                .is_ok()
        );
    }
}
