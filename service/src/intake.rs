//! The request-path admission service.
//!
//! Everything here must stay cheap: one catalog read for the window gate,
//! one atomic cache call for the verdict, and the durable insert plus
//! publish only for admitted buyers. Rejections never touch the ledger.

use crate::{INTENT_TOPIC, ORDER_MARKER_TTL};
use flashsale_core::{
    AdmissionVerdict, CacheError, Clock, InventoryCache, MessageQueue, NewOrder, OrderIntent,
    OrderStore, QueueError, RejectReason, SaleStore, StoreError,
};
use std::sync::Arc;
use thiserror::Error;

/// Infrastructure failures on the admission path.
///
/// Business rejections are not errors; they come back as
/// [`AdmissionReply::Rejected`].
#[derive(Debug, Error)]
pub enum IntakeError {
    /// The inventory cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The durable store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The intent could not be published.
    ///
    /// The pending ledger row already exists at this point; it stays
    /// pending until operator intervention (there is no reconciliation
    /// sweep), so the error is surfaced rather than swallowed.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// The answer given to a buyer at admission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionReply {
    /// Admitted; fulfillment continues asynchronously under this order
    /// number.
    Queued {
        /// The freshly minted order number to poll with.
        order_no: String,
    },
    /// Refused for a business reason. Terminal for this request.
    Rejected {
        /// Why the buyer was refused.
        reason: RejectReason,
    },
}

/// Admission service: sale gate, atomic cache admission, pending order,
/// intent publish.
#[derive(Clone)]
pub struct IntakeService {
    cache: Arc<dyn InventoryCache>,
    orders: Arc<dyn OrderStore>,
    sales: Arc<dyn SaleStore>,
    queue: Arc<dyn MessageQueue>,
    clock: Arc<dyn Clock>,
    intent_topic: String,
}

impl IntakeService {
    /// Wires the service to its collaborators.
    #[must_use]
    pub fn new(
        cache: Arc<dyn InventoryCache>,
        orders: Arc<dyn OrderStore>,
        sales: Arc<dyn SaleStore>,
        queue: Arc<dyn MessageQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            orders,
            sales,
            queue,
            clock,
            intent_topic: INTENT_TOPIC.to_string(),
        }
    }

    /// Overrides the intent topic.
    #[must_use]
    pub fn with_intent_topic(mut self, topic: impl Into<String>) -> Self {
        self.intent_topic = topic.into();
        self
    }

    /// Admits or refuses a buyer for a product.
    ///
    /// On admission the pending ledger row is created and the intent
    /// published before the reply, so a `Queued` answer means the order is
    /// durably in flight.
    ///
    /// # Errors
    ///
    /// Returns [`IntakeError`] on infrastructure failure; the buyer should
    /// be told to retry.
    pub async fn precheck_and_queue(
        &self,
        user_id: &str,
        product_id: &str,
    ) -> Result<AdmissionReply, IntakeError> {
        let now = self.clock.now();

        let Some(sale) = self.sales.active_sale().await? else {
            return Ok(Self::reject(RejectReason::SaleNotStarted));
        };
        if !sale.is_active(now) {
            return Ok(Self::reject(RejectReason::SaleNotStarted));
        }

        match self.cache.admit(product_id, user_id).await? {
            AdmissionVerdict::Rejected(reason) => Ok(Self::reject(reason)),
            AdmissionVerdict::Admitted => {
                let product = self
                    .sales
                    .sale_product(sale.id, product_id)
                    .await?
                    .ok_or_else(|| {
                        StoreError::NotFound(format!(
                            "product '{product_id}' not in sale {}",
                            sale.id
                        ))
                    })?;

                let order_no = uuid::Uuid::new_v4().to_string();
                self.orders
                    .create_pending(&NewOrder {
                        order_no: order_no.clone(),
                        user_id: user_id.to_string(),
                        product_id: product_id.to_string(),
                        sale_id: sale.id,
                        price: product.sale_price,
                    })
                    .await?;

                let intent = OrderIntent::new(&order_no, user_id, product_id, now);
                let payload = intent
                    .to_bytes()
                    .map_err(|e| QueueError::SerializationFailed(e.to_string()))?;
                self.queue
                    .publish(&self.intent_topic, product_id, &payload)
                    .await?;

                // Best effort: the marker only serves result lookups while
                // the row is pending, so a cache hiccup must not fail an
                // admitted buyer.
                if let Err(e) = self
                    .cache
                    .set_order_marker(&order_no, "pending", ORDER_MARKER_TTL)
                    .await
                {
                    tracing::warn!(order_no = %order_no, error = %e, "failed to write order marker");
                }

                tracing::info!(order_no = %order_no, user_id, product_id, "order queued");
                metrics::counter!("flashsale.admission", "result" => "queued").increment(1);
                Ok(AdmissionReply::Queued { order_no })
            }
        }
    }

    fn reject(reason: RejectReason) -> AdmissionReply {
        tracing::debug!(reason = %reason, "admission rejected");
        metrics::counter!("flashsale.admission", "result" => reason.as_str()).increment(1);
        AdmissionReply::Rejected { reason }
    }
}
