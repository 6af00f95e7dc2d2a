//! The fulfillment worker.
//!
//! Consumes order intents and settles each order durably: re-check the
//! admission record, take the per-product lock, then decrement stock and
//! flip the order status inside one transaction. Every failure is tagged
//! ([`ProcessError`]) so the consumer loop knows whether to ack, retry, or
//! dead-letter.

use crate::{DEAD_LETTER_TOPIC, INTENT_TOPIC};
use flashsale_core::{
    Clock, DeadLetter, Delivery, InventoryCache, MessageQueue, OrderIntent, OrderStore,
    ProcessError, QueueError, RejectReason,
};
use flashsale_runtime::{RetryPolicy, Shutdown, retry_with_predicate};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for the fulfillment worker.
#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    /// Attempt count, backoff, and per-attempt timeout for one message.
    pub retry: RetryPolicy,
    /// Intents older than this are dropped as successes; the buyer has long
    /// since been told to retry.
    pub staleness_limit: Duration,
    /// TTL on the per-product lock; bounds the stall when a worker dies
    /// while holding it.
    pub lock_ttl: Duration,
    /// Topic carrying order intents.
    pub intent_topic: String,
    /// Topic receiving exhausted intents.
    pub dead_letter_topic: String,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            staleness_limit: Duration::from_secs(60 * 60),
            lock_ttl: Duration::from_secs(5),
            intent_topic: INTENT_TOPIC.to_string(),
            dead_letter_topic: DEAD_LETTER_TOPIC.to_string(),
        }
    }
}

/// Settles admitted orders against the durable store.
#[derive(Clone)]
pub struct FulfillmentWorker {
    cache: Arc<dyn InventoryCache>,
    orders: Arc<dyn OrderStore>,
    queue: Arc<dyn MessageQueue>,
    clock: Arc<dyn Clock>,
    config: FulfillmentConfig,
}

impl FulfillmentWorker {
    /// Wires the worker to its collaborators.
    #[must_use]
    pub fn new(
        cache: Arc<dyn InventoryCache>,
        orders: Arc<dyn OrderStore>,
        queue: Arc<dyn MessageQueue>,
        clock: Arc<dyn Clock>,
        config: FulfillmentConfig,
    ) -> Self {
        Self {
            cache,
            orders,
            queue,
            clock,
            config,
        }
    }

    /// Runs one attempt over an intent payload.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::Permanent`] for malformed payloads.
    /// - [`ProcessError::Rejected`] for business refusals (no admission
    ///   record, durably out of stock); terminal, no retry.
    /// - [`ProcessError::Transient`] for infrastructure faults and lock
    ///   contention; the caller retries.
    pub async fn process(&self, payload: &[u8]) -> Result<(), ProcessError> {
        let intent = OrderIntent::from_bytes(payload)
            .map_err(|e| ProcessError::Permanent(format!("malformed intent: {e}")))?;

        let now = self.clock.now();
        let age = intent.age_secs(now);
        if age > i64::try_from(self.config.staleness_limit.as_secs()).unwrap_or(i64::MAX) {
            tracing::warn!(order_no = %intent.order_no, age_secs = age, "dropping stale intent");
            metrics::counter!("flashsale.fulfillment", "result" => "stale").increment(1);
            return Ok(());
        }

        // Redelivery guard: a terminal order was already settled by a
        // previous delivery of this intent.
        match self
            .orders
            .order_status(&intent.order_no)
            .await
            .map_err(|e| ProcessError::Transient(e.to_string()))?
        {
            Some(status) if status.is_terminal() => {
                tracing::debug!(order_no = %intent.order_no, status = status.as_str(), "order already settled");
                return Ok(());
            }
            Some(_) => {}
            // The pending insert committed before publish, so a missing row
            // points at replica lag; retry rather than discard.
            None => {
                return Err(ProcessError::Transient(format!(
                    "order '{}' not found",
                    intent.order_no
                )));
            }
        }

        let admitted = self
            .cache
            .finalize(&intent.product_id, &intent.user_id)
            .await
            .map_err(|e| ProcessError::Transient(e.to_string()))?;
        if !admitted {
            metrics::counter!("flashsale.fulfillment", "result" => "rejected").increment(1);
            return Err(ProcessError::Rejected(RejectReason::FinalizeRejected));
        }

        let locked = self
            .cache
            .acquire_lock(&intent.product_id, self.config.lock_ttl)
            .await
            .map_err(|e| ProcessError::Transient(e.to_string()))?;
        if !locked {
            return Err(ProcessError::Transient(format!(
                "product '{}' lock held",
                intent.product_id
            )));
        }

        let result = self.fulfill(&intent).await;

        if let Err(e) = self.cache.release_lock(&intent.product_id).await {
            // The TTL reclaims it; fulfillment already settled either way.
            tracing::warn!(product_id = %intent.product_id, error = %e, "failed to release lock");
        }

        result
    }

    /// The transactional core: decrement durable stock and settle the order
    /// status atomically.
    async fn fulfill(&self, intent: &OrderIntent) -> Result<(), ProcessError> {
        let transient = |e: flashsale_core::StoreError| ProcessError::Transient(e.to_string());

        let mut tx = self.orders.begin().await.map_err(transient)?;

        let decremented = tx
            .decrement_stock(&intent.product_id, 1)
            .await
            .map_err(transient)?;

        if decremented {
            let marked = tx.mark_success(&intent.order_no).await.map_err(transient)?;
            if !marked {
                // The order left pending between the idempotency check and
                // this transaction (a compensator failed it). Dropping the
                // transaction rolls the decrement back.
                drop(tx);
                tracing::debug!(order_no = %intent.order_no, "order settled concurrently, skipping");
                return Ok(());
            }
            tx.commit().await.map_err(transient)?;

            tracing::info!(order_no = %intent.order_no, "order fulfilled");
            metrics::counter!("flashsale.fulfillment", "result" => "success").increment(1);
            Ok(())
        } else {
            // Durable stock is authoritative; the cache overadmitted (e.g.
            // after a compensation race). Fail the order in the same
            // transaction so the buyer sees a terminal state.
            tx.mark_failed(&intent.order_no, RejectReason::OutOfStock.as_str())
                .await
                .map_err(transient)?;
            tx.commit().await.map_err(transient)?;

            tracing::warn!(order_no = %intent.order_no, "durable stock exhausted");
            metrics::counter!("flashsale.fulfillment", "result" => "out_of_stock").increment(1);
            Err(ProcessError::Rejected(RejectReason::OutOfStock))
        }
    }

    /// Runs one delivery through the retry policy and settles its
    /// acknowledgment.
    ///
    /// Rejected and permanent outcomes ack immediately. Exhausted transient
    /// failures publish a dead letter and then ack; when the dead-letter
    /// publish itself fails the delivery is **not** acked, so the broker
    /// redelivers it rather than losing the order.
    ///
    /// # Errors
    ///
    /// Returns the queue error when the dead-letter publish or the ack
    /// fails.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<(), QueueError> {
        let payload = delivery.payload().to_vec();

        let outcome = retry_with_predicate(
            &self.config.retry,
            || self.process(&payload),
            ProcessError::is_retryable,
            |budget| ProcessError::Transient(format!("attempt timed out after {budget:?}")),
        )
        .await;

        match outcome {
            Ok(()) => delivery.ack().await,
            Err(ProcessError::Rejected(reason)) => {
                tracing::info!(reason = %reason, "intent rejected");
                delivery.ack().await
            }
            Err(ProcessError::Permanent(msg)) => {
                tracing::warn!(error = %msg, "dropping unprocessable intent");
                delivery.ack().await
            }
            Err(ProcessError::Transient(msg)) => {
                self.dead_letter(&payload, &msg).await?;
                delivery.ack().await
            }
        }
    }

    async fn dead_letter(&self, payload: &[u8], reason: &str) -> Result<(), QueueError> {
        // Transient failures only happen after a successful parse, so this
        // re-parse cannot fail in practice; guard anyway.
        let intent = OrderIntent::from_bytes(payload)
            .map_err(|e| QueueError::SerializationFailed(e.to_string()))?;
        let dead_letter = DeadLetter::from_intent(&intent, reason);
        let body = dead_letter
            .to_bytes()
            .map_err(|e| QueueError::SerializationFailed(e.to_string()))?;

        self.queue
            .publish(&self.config.dead_letter_topic, &intent.product_id, &body)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    order_no = %intent.order_no,
                    error = %e,
                    "dead-letter publish failed, leaving delivery unacked"
                );
            })?;

        tracing::warn!(order_no = %intent.order_no, reason, "intent dead-lettered");
        metrics::counter!("flashsale.dead_letters").increment(1);
        Ok(())
    }

    /// Consumes the intent topic until shutdown.
    ///
    /// # Errors
    ///
    /// Returns the queue error when the subscription cannot be established.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<(), QueueError> {
        let mut stream = self.queue.subscribe(&self.config.intent_topic).await?;
        tracing::info!(topic = %self.config.intent_topic, "fulfillment worker started");

        loop {
            tokio::select! {
                () = shutdown.triggered() => break,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(e) = self.handle_delivery(delivery).await {
                            tracing::warn!(error = %e, "delivery left unacked");
                        }
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "transport error on intent stream"),
                    None => break,
                },
            }
        }

        tracing::info!("fulfillment worker stopped");
        Ok(())
    }
}
