//! Order result lookups for polling buyers.

use flashsale_core::{InventoryCache, Order, OrderStatus, OrderStore, StoreError};
use std::sync::Arc;

/// What a polling buyer is told about their order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderResult {
    /// The order is still in the pipeline; poll again.
    Processing,
    /// Durably fulfilled.
    Succeeded(Order),
    /// Terminally failed; the reservation was compensated.
    Failed(Order),
    /// No trace of this order number.
    NotFound,
}

/// Reads order state, preferring the ledger and falling back to the cache
/// marker for rows not yet visible.
#[derive(Clone)]
pub struct ResultService {
    cache: Arc<dyn InventoryCache>,
    orders: Arc<dyn OrderStore>,
}

impl ResultService {
    /// Wires the service to its collaborators.
    #[must_use]
    pub fn new(cache: Arc<dyn InventoryCache>, orders: Arc<dyn OrderStore>) -> Self {
        Self { cache, orders }
    }

    /// Resolves the current state of an order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the ledger cannot be read.
    pub async fn query(&self, order_no: &str) -> Result<OrderResult, StoreError> {
        if let Some(order) = self.orders.order_by_no(order_no).await? {
            return Ok(match order.status {
                OrderStatus::Pending => OrderResult::Processing,
                OrderStatus::Success => OrderResult::Succeeded(order),
                OrderStatus::Failed => OrderResult::Failed(order),
            });
        }

        // The marker outlives replica lag on the pending insert; only when
        // both are silent is the order number unknown.
        match self.cache.order_marker(order_no).await {
            Ok(Some(_)) => Ok(OrderResult::Processing),
            Ok(None) => Ok(OrderResult::NotFound),
            Err(e) => {
                tracing::warn!(order_no, error = %e, "marker lookup failed");
                Ok(OrderResult::NotFound)
            }
        }
    }
}
