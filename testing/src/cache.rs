//! In-memory inventory cache.

use flashsale_core::cache::CacheFuture;
use flashsale_core::{AdmissionVerdict, InventoryCache, RejectReason, Sale, SaleProduct};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct CacheState {
    counters: HashMap<String, i64>,
    purchased: HashMap<String, HashSet<String>>,
    locks: HashSet<String>,
    active_sale: Option<Sale>,
    markers: HashMap<String, String>,
}

/// Inventory cache held in a single mutex, which gives admission the same
/// atomicity the server-side script provides. TTLs are accepted and
/// ignored; expiry is not simulated.
#[derive(Default, Clone)]
pub struct InMemoryInventoryCache {
    state: Arc<Mutex<CacheState>>,
}

impl InMemoryInventoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds a stock counter directly, bypassing the warm-up guard.
    pub fn set_stock(&self, product_id: &str, stock: i64) {
        self.lock().counters.insert(product_id.to_string(), stock);
    }

    /// Number of buyers admitted for a product.
    #[must_use]
    pub fn purchased_count(&self, product_id: &str) -> usize {
        self.lock().purchased.get(product_id).map_or(0, HashSet::len)
    }

    /// Whether the per-product lock is currently held.
    #[must_use]
    pub fn lock_held(&self, product_id: &str) -> bool {
        self.lock().locks.contains(product_id)
    }
}

impl InventoryCache for InMemoryInventoryCache {
    fn admit<'a>(
        &'a self,
        product_id: &'a str,
        user_id: &'a str,
    ) -> CacheFuture<'a, AdmissionVerdict> {
        Box::pin(async move {
            let mut state = self.lock();
            let Some(stock) = state.counters.get(product_id).copied() else {
                return Ok(AdmissionVerdict::Rejected(RejectReason::StockNotFound));
            };
            if stock <= 0 {
                return Ok(AdmissionVerdict::Rejected(RejectReason::OutOfStock));
            }
            let buyers = state.purchased.entry(product_id.to_string()).or_default();
            if buyers.contains(user_id) {
                return Ok(AdmissionVerdict::Rejected(RejectReason::AlreadyPurchased));
            }
            buyers.insert(user_id.to_string());
            if let Some(counter) = state.counters.get_mut(product_id) {
                *counter -= 1;
            }
            Ok(AdmissionVerdict::Admitted)
        })
    }

    fn finalize<'a>(&'a self, product_id: &'a str, user_id: &'a str) -> CacheFuture<'a, bool> {
        Box::pin(async move {
            Ok(self
                .lock()
                .purchased
                .get(product_id)
                .is_some_and(|buyers| buyers.contains(user_id)))
        })
    }

    fn restore_stock<'a>(&'a self, product_id: &'a str, qty: i64) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            *self
                .lock()
                .counters
                .entry(product_id.to_string())
                .or_insert(0) += qty;
            Ok(())
        })
    }

    fn stock<'a>(&'a self, product_id: &'a str) -> CacheFuture<'a, Option<i64>> {
        Box::pin(async move { Ok(self.lock().counters.get(product_id).copied()) })
    }

    fn warm_up<'a>(&'a self, products: &'a [SaleProduct], _ttl: Duration) -> CacheFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.lock();
            if products
                .iter()
                .any(|p| state.counters.contains_key(&p.product_id))
            {
                return Ok(false);
            }
            for product in products {
                state
                    .counters
                    .insert(product.product_id.clone(), product.sale_stock);
            }
            Ok(true)
        })
    }

    fn put_active_sale<'a>(&'a self, sale: &'a Sale, _ttl: Duration) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            self.lock().active_sale = Some(sale.clone());
            Ok(())
        })
    }

    fn active_sale(&self) -> CacheFuture<'_, Option<Sale>> {
        Box::pin(async move { Ok(self.lock().active_sale.clone()) })
    }

    fn acquire_lock<'a>(&'a self, product_id: &'a str, _ttl: Duration) -> CacheFuture<'a, bool> {
        Box::pin(async move { Ok(self.lock().locks.insert(product_id.to_string())) })
    }

    fn release_lock<'a>(&'a self, product_id: &'a str) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            self.lock().locks.remove(product_id);
            Ok(())
        })
    }

    fn set_order_marker<'a>(
        &'a self,
        order_no: &'a str,
        status: &'a str,
        _ttl: Duration,
    ) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            self.lock()
                .markers
                .insert(order_no.to_string(), status.to_string());
            Ok(())
        })
    }

    fn order_marker<'a>(&'a self, order_no: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.lock().markers.get(order_no).cloned()) })
    }
}
