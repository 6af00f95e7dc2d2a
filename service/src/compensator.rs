//! Compensation for dead-lettered orders.
//!
//! A dead letter means fulfillment gave up on an admitted order: the buyer
//! holds a cache reservation that will never become a durable order. The
//! compensator fails the order and returns its unit to the stock counter so
//! another buyer can take it.

use crate::ORDER_MARKER_TTL;
use flashsale_core::{DeadLetter, InventoryCache, MessageQueue, OrderStore, ProcessError};
use flashsale_runtime::Shutdown;
use futures::StreamExt;
use std::sync::Arc;

/// Applies compensation for one dead letter.
#[derive(Clone)]
pub struct Compensator {
    cache: Arc<dyn InventoryCache>,
    orders: Arc<dyn OrderStore>,
}

impl Compensator {
    /// Wires the compensator to its collaborators.
    #[must_use]
    pub fn new(cache: Arc<dyn InventoryCache>, orders: Arc<dyn OrderStore>) -> Self {
        Self { cache, orders }
    }

    /// Fails the order and restores its reserved unit.
    ///
    /// Idempotent via the terminal-status guard: a redelivered dead letter
    /// whose order is already settled is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Transient`] on infrastructure failure; the
    /// caller must leave the dead letter unacked so it is redelivered.
    pub async fn compensate(&self, dead_letter: &DeadLetter) -> Result<(), ProcessError> {
        let order_no = &dead_letter.payload.order_no;

        match self
            .orders
            .order_status(order_no)
            .await
            .map_err(|e| ProcessError::Transient(e.to_string()))?
        {
            Some(status) if status.is_terminal() => {
                tracing::debug!(order_no = %order_no, status = status.as_str(), "already settled, skipping compensation");
                return Ok(());
            }
            Some(_) => {}
            None => {
                return Err(ProcessError::Transient(format!(
                    "order '{order_no}' not found"
                )));
            }
        }

        // Guarded on pending. A false return means fulfillment won a race
        // to a terminal state, so the stock restore below must not run.
        let failed = self
            .orders
            .mark_failed(order_no, &dead_letter.reason)
            .await
            .map_err(|e| ProcessError::Transient(e.to_string()))?;
        if !failed {
            tracing::debug!(order_no = %order_no, "order settled concurrently, skipping compensation");
            return Ok(());
        }

        self.cache
            .restore_stock(&dead_letter.payload.product_id, 1)
            .await
            .map_err(|e| ProcessError::Transient(e.to_string()))?;

        // Best effort, like at intake.
        if let Err(e) = self
            .cache
            .set_order_marker(order_no, "failed", ORDER_MARKER_TTL)
            .await
        {
            tracing::warn!(order_no = %order_no, error = %e, "failed to update order marker");
        }

        tracing::info!(
            order_no = %order_no,
            product_id = %dead_letter.payload.product_id,
            reason = %dead_letter.reason,
            "order compensated"
        );
        metrics::counter!("flashsale.compensations").increment(1);
        Ok(())
    }
}

/// Consumer loop over the dead-letter topic.
///
/// No local retry: a failed compensation leaves the delivery unacked and
/// the broker redelivers it, which is retry enough at dead-letter volumes.
#[derive(Clone)]
pub struct DeadLetterWorker {
    compensator: Compensator,
    queue: Arc<dyn MessageQueue>,
    topic: String,
}

impl DeadLetterWorker {
    /// Wires the worker to the dead-letter topic.
    #[must_use]
    pub fn new(compensator: Compensator, queue: Arc<dyn MessageQueue>, topic: impl Into<String>) -> Self {
        Self {
            compensator,
            queue,
            topic: topic.into(),
        }
    }

    /// Handles one dead-letter delivery.
    ///
    /// Malformed dead letters are acked and dropped; nothing can ever
    /// process them. Compensation errors leave the delivery unacked.
    ///
    /// # Errors
    ///
    /// Returns the queue error when the ack fails.
    pub async fn handle_delivery(
        &self,
        delivery: flashsale_core::Delivery,
    ) -> Result<(), flashsale_core::QueueError> {
        match DeadLetter::from_bytes(delivery.payload()) {
            Err(e) => {
                tracing::error!(error = %e, "dropping malformed dead letter");
                delivery.ack().await
            }
            Ok(dead_letter) => match self.compensator.compensate(&dead_letter).await {
                Ok(()) => delivery.ack().await,
                Err(e) => {
                    tracing::warn!(
                        order_no = %dead_letter.payload.order_no,
                        error = %e,
                        "compensation failed, leaving delivery unacked"
                    );
                    Ok(())
                }
            },
        }
    }

    /// Consumes the dead-letter topic until shutdown.
    ///
    /// # Errors
    ///
    /// Returns the queue error when the subscription cannot be established.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<(), flashsale_core::QueueError> {
        let mut stream = self.queue.subscribe(&self.topic).await?;
        tracing::info!(topic = %self.topic, "dead-letter worker started");

        loop {
            tokio::select! {
                () = shutdown.triggered() => break,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(e) = self.handle_delivery(delivery).await {
                            tracing::warn!(error = %e, "failed to ack dead letter");
                        }
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "transport error on dead-letter stream"),
                    None => break,
                },
            }
        }

        tracing::info!("dead-letter worker stopped");
        Ok(())
    }
}
