//! Pre-sale warm-up: seed the cache so admission can run without touching
//! the durable store.

use flashsale_core::{CacheError, Clock, InventoryCache, SaleStatus, SaleStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// Warm-up failures.
#[derive(Debug, Error)]
pub enum WarmupError {
    /// The sale does not exist.
    #[error("sale {0} not found")]
    SaleNotFound(i64),

    /// The sale is over; warming it would admit buyers into a closed
    /// window.
    #[error("sale {0} has ended")]
    SaleEnded(i64),

    /// The durable store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The inventory cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Seeds stock counters and the active-sale record for a sale.
#[derive(Clone)]
pub struct WarmupService {
    cache: Arc<dyn InventoryCache>,
    sales: Arc<dyn SaleStore>,
    clock: Arc<dyn Clock>,
}

impl WarmupService {
    /// Wires the service to its collaborators.
    #[must_use]
    pub fn new(
        cache: Arc<dyn InventoryCache>,
        sales: Arc<dyn SaleStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { cache, sales, clock }
    }

    /// Warms a specific sale.
    ///
    /// Returns `true` when the counters were written, `false` when they
    /// already existed (an idempotent re-run).
    ///
    /// # Errors
    ///
    /// Refuses ended sales; propagates store and cache failures.
    pub async fn warm_up_by_id(&self, sale_id: i64) -> Result<bool, WarmupError> {
        let sale = self
            .sales
            .sale_by_id(sale_id)
            .await?
            .ok_or(WarmupError::SaleNotFound(sale_id))?;

        let now = self.clock.now();
        if sale.status == SaleStatus::Ended || now >= sale.end_at {
            return Err(WarmupError::SaleEnded(sale_id));
        }

        let products = self.sales.sale_products(sale_id).await?;
        let ttl = sale.cache_ttl(now);
        let warmed = self.cache.warm_up(&products, ttl).await?;

        // Best effort: admission falls back to the catalog when the cached
        // record is missing.
        if let Err(e) = self.cache.put_active_sale(&sale, ttl).await {
            tracing::warn!(sale_id, error = %e, "failed to cache active sale record");
        }

        // Only from `scheduled`, so concurrent warm-up runs advance it
        // exactly once.
        let advanced = self
            .sales
            .update_sale_status(sale_id, SaleStatus::Scheduled, SaleStatus::Active)
            .await?;

        tracing::info!(
            sale_id,
            products = products.len(),
            warmed,
            advanced,
            "sale warm-up complete"
        );
        Ok(warmed)
    }

    /// Warms whichever sale is currently in window.
    ///
    /// # Errors
    ///
    /// Returns [`WarmupError::SaleNotFound`] (with id 0) when no sale is in
    /// window; otherwise as [`warm_up_by_id`](Self::warm_up_by_id).
    pub async fn warm_up_active(&self) -> Result<bool, WarmupError> {
        let sale = self
            .sales
            .active_sale()
            .await?
            .ok_or(WarmupError::SaleNotFound(0))?;
        self.warm_up_by_id(sale.id).await
    }
}
