//! In-memory message queue with ack accounting and failure injection.

use flashsale_core::queue::QueueFuture;
use flashsale_core::{AckHandle, Delivery, DeliveryStream, MessageQueue, QueueError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct TopicState {
    pending: VecDeque<Vec<u8>>,
    published: Vec<Vec<u8>>,
    acked: usize,
}

#[derive(Default)]
struct QueueState {
    topics: HashMap<String, TopicState>,
    failing_topics: HashSet<String>,
}

/// Message queue held in memory.
///
/// Each topic is a FIFO; subscribers poll it. Acks are counted per topic so
/// tests can assert which deliveries were (or deliberately were not)
/// acknowledged. Publishes to a topic armed with
/// [`fail_publishes_to`](Self::fail_publishes_to) return an error, which
/// drives the dead-letter failure paths.
#[derive(Default, Clone)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every publish to `topic` fail until cleared.
    pub fn fail_publishes_to(&self, topic: &str) {
        self.lock().failing_topics.insert(topic.to_string());
    }

    /// Clears a publish failure injection.
    pub fn allow_publishes_to(&self, topic: &str) {
        self.lock().failing_topics.remove(topic);
    }

    /// Every payload ever published to `topic`, in order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.published.clone())
            .unwrap_or_default()
    }

    /// Number of acknowledged deliveries on `topic`.
    #[must_use]
    pub fn acked(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, |t| t.acked)
    }

    /// Number of messages not yet handed to a subscriber.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, |t| t.pending.len())
    }
}

struct MemAck {
    state: Arc<Mutex<QueueState>>,
    topic: String,
}

impl AckHandle for MemAck {
    fn ack(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.topics.entry(self.topic).or_default().acked += 1;
            Ok(())
        })
    }
}

impl MessageQueue for InMemoryQueue {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        _key: &'a str,
        payload: &'a [u8],
    ) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.failing_topics.contains(topic) {
                return Err(QueueError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "injected publish failure".to_string(),
                });
            }
            let entry = state.topics.entry(topic.to_string()).or_default();
            entry.pending.push_back(payload.to_vec());
            entry.published.push(payload.to_vec());
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> QueueFuture<'a, DeliveryStream> {
        let topic = topic.to_string();
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            let stream = async_stream::stream! {
                loop {
                    let next = {
                        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                        guard.topics.entry(topic.clone()).or_default().pending.pop_front()
                    };
                    match next {
                        Some(payload) => {
                            let ack = MemAck {
                                state: Arc::clone(&state),
                                topic: topic.clone(),
                            };
                            yield Ok(Delivery::new(payload, Box::new(ack)));
                        }
                        None => tokio::time::sleep(Duration::from_millis(5)).await,
                    }
                }
                #[allow(unreachable_code)]
                ()
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn publish_subscribe_ack_roundtrip() {
        let queue = InMemoryQueue::new();
        queue.publish("orders", "p-1", b"one").await.unwrap();
        queue.publish("orders", "p-1", b"two").await.unwrap();

        let mut stream = queue.subscribe("orders").await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.payload(), b"one");
        first.ack().await.unwrap();

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.payload(), b"two");
        // Left unacked on purpose.

        assert_eq!(queue.acked("orders"), 1);
        assert_eq!(queue.published("orders").len(), 2);
    }

    #[tokio::test]
    async fn injected_publish_failure() {
        let queue = InMemoryQueue::new();
        queue.fail_publishes_to("dead-letters");

        let err = queue.publish("dead-letters", "p-1", b"x").await.unwrap_err();
        assert!(matches!(err, QueueError::PublishFailed { .. }));

        queue.allow_publishes_to("dead-letters");
        queue.publish("dead-letters", "p-1", b"x").await.unwrap();
        assert_eq!(queue.published("dead-letters").len(), 1);
    }
}
