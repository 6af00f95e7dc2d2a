//! # Flashsale Redis
//!
//! Redis implementation of the inventory cache contract.
//!
//! The cache carries the hot admission path: a single Lua script call checks
//! stock, checks the buyer, decrements, and records the buyer atomically.
//! Everything else here (locks, warm-up, markers, the active-sale record)
//! serves the async pipeline and operational tooling.
//!
//! Connection pooling goes through `ConnectionManager`; each operation
//! clones the manager, which shares the underlying multiplexed connection.

pub mod scripts;

use flashsale_core::cache::CacheFuture;
use flashsale_core::{AdmissionVerdict, CacheError, InventoryCache, RejectReason, Sale, SaleProduct};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Key layout, shared with operational tooling.
pub mod keys {
    /// The cached active-sale record.
    pub const ACTIVE_SALE: &str = "flashsale:active:info";

    /// Stock counter for a product.
    #[must_use]
    pub fn stock(product_id: &str) -> String {
        format!("flashsale:stock:{product_id}")
    }

    /// Set of buyers admitted for a product.
    #[must_use]
    pub fn purchased(product_id: &str) -> String {
        format!("flashsale:purchased:{product_id}")
    }

    /// Per-product fulfillment lock.
    #[must_use]
    pub fn lock(product_id: &str) -> String {
        format!("lock:product:{product_id}")
    }

    /// Short-lived order status marker.
    #[must_use]
    pub fn order(order_no: &str) -> String {
        format!("flashsale:order:{order_no}")
    }
}

/// Inventory cache backed by Redis.
///
/// Cheap to clone; all clones share the same connection manager and
/// preloaded script handles.
#[derive(Clone)]
pub struct RedisInventoryCache {
    conn_manager: ConnectionManager,
    admission: redis::Script,
    finalize: redis::Script,
}

impl RedisInventoryCache {
    /// Connects to Redis and prepares the script handles.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ConnectionFailed`] when the URL is invalid or
    /// the server is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::ConnectionFailed(format!("invalid redis url: {e}")))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            conn_manager,
            admission: redis::Script::new(scripts::ADMISSION),
            finalize: redis::Script::new(scripts::FINALIZE),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn_manager.clone()
    }
}

fn map_err(e: &redis::RedisError) -> CacheError {
    if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() {
        CacheError::ConnectionFailed(e.to_string())
    } else {
        CacheError::CommandFailed(e.to_string())
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    // Redis rejects non-positive expirations.
    ttl.as_secs().max(1)
}

impl InventoryCache for RedisInventoryCache {
    fn admit<'a>(
        &'a self,
        product_id: &'a str,
        user_id: &'a str,
    ) -> CacheFuture<'a, AdmissionVerdict> {
        Box::pin(async move {
            let mut conn = self.conn();
            let (code, reason): (i64, String) = self
                .admission
                .key(keys::stock(product_id))
                .key(keys::purchased(product_id))
                .arg(user_id)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| CacheError::ScriptFailed(e.to_string()))?;

            if code == 1 {
                return Ok(AdmissionVerdict::Admitted);
            }
            let reject = RejectReason::from_wire(&reason).ok_or_else(|| {
                CacheError::UnexpectedReply(format!("unknown admission reason '{reason}'"))
            })?;
            Ok(AdmissionVerdict::Rejected(reject))
        })
    }

    fn finalize<'a>(&'a self, product_id: &'a str, user_id: &'a str) -> CacheFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn();
            let member: i64 = self
                .finalize
                .key(keys::purchased(product_id))
                .arg(user_id)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| CacheError::ScriptFailed(e.to_string()))?;
            Ok(member == 1)
        })
    }

    fn restore_stock<'a>(&'a self, product_id: &'a str, qty: i64) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn();
            let new_stock: i64 = conn
                .incr(keys::stock(product_id), qty)
                .await
                .map_err(|e| map_err(&e))?;
            tracing::info!(product_id, qty, new_stock, "restored stock");
            Ok(())
        })
    }

    fn stock<'a>(&'a self, product_id: &'a str) -> CacheFuture<'a, Option<i64>> {
        Box::pin(async move {
            let mut conn = self.conn();
            conn.get(keys::stock(product_id))
                .await
                .map_err(|e| map_err(&e))
        })
    }

    fn warm_up<'a>(&'a self, products: &'a [SaleProduct], ttl: Duration) -> CacheFuture<'a, bool> {
        Box::pin(async move {
            let Some(first) = products.first() else {
                return Ok(false);
            };
            let mut conn = self.conn();

            // Never reset live counters: a warm-up re-run while buyers are
            // decrementing would resurrect sold stock.
            let exists: bool = conn
                .exists(keys::stock(&first.product_id))
                .await
                .map_err(|e| map_err(&e))?;
            if exists {
                tracing::warn!(
                    product_id = %first.product_id,
                    "stock keys already warmed, skipping"
                );
                return Ok(false);
            }

            let secs = ttl_secs(ttl);
            let mut pipe = redis::pipe();
            for product in products {
                pipe.set_ex(keys::stock(&product.product_id), product.sale_stock, secs)
                    .ignore();
            }
            let _: () = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| map_err(&e))?;

            tracing::info!(products = products.len(), ttl_secs = secs, "warmed stock keys");
            Ok(true)
        })
    }

    fn put_active_sale<'a>(&'a self, sale: &'a Sale, ttl: Duration) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let body = serde_json::to_string(sale)
                .map_err(|e| CacheError::CommandFailed(format!("serialize sale: {e}")))?;
            let mut conn = self.conn();
            let _: () = conn
                .set_ex(keys::ACTIVE_SALE, body, ttl_secs(ttl))
                .await
                .map_err(|e| map_err(&e))?;
            Ok(())
        })
    }

    fn active_sale(&self) -> CacheFuture<'_, Option<Sale>> {
        Box::pin(async move {
            let mut conn = self.conn();
            let body: Option<String> = conn
                .get(keys::ACTIVE_SALE)
                .await
                .map_err(|e| map_err(&e))?;
            match body {
                None => Ok(None),
                Some(json) => serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| CacheError::UnexpectedReply(format!("corrupt sale record: {e}"))),
            }
        })
    }

    fn acquire_lock<'a>(&'a self, product_id: &'a str, ttl: Duration) -> CacheFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn();
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            let reply: Option<String> = redis::cmd("SET")
                .arg(keys::lock(product_id))
                .arg("1")
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_err(&e))?;
            Ok(reply.is_some())
        })
    }

    fn release_lock<'a>(&'a self, product_id: &'a str) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn();
            let _: i64 = conn
                .del(keys::lock(product_id))
                .await
                .map_err(|e| map_err(&e))?;
            Ok(())
        })
    }

    fn set_order_marker<'a>(
        &'a self,
        order_no: &'a str,
        status: &'a str,
        ttl: Duration,
    ) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn();
            let key = keys::order(order_no);
            let updated_at = chrono::Utc::now().timestamp().to_string();
            let fields: [(&str, &str); 2] = [("status", status), ("updated_at", &updated_at)];
            let _: () = conn
                .hset_multiple(&key, &fields)
                .await
                .map_err(|e| map_err(&e))?;
            let _: bool = conn
                .expire(&key, i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX))
                .await
                .map_err(|e| map_err(&e))?;
            Ok(())
        })
    }

    fn order_marker<'a>(&'a self, order_no: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn();
            conn.hget(keys::order(order_no), "status")
                .await
                .map_err(|e| map_err(&e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_stable() {
        assert_eq!(keys::stock("p-1"), "flashsale:stock:p-1");
        assert_eq!(keys::purchased("p-1"), "flashsale:purchased:p-1");
        assert_eq!(keys::lock("p-1"), "lock:product:p-1");
        assert_eq!(keys::order("ord-1"), "flashsale:order:ord-1");
    }

    #[test]
    fn ttl_is_clamped_to_one_second() {
        assert_eq!(ttl_secs(Duration::ZERO), 1);
        assert_eq!(ttl_secs(Duration::from_secs(90)), 90);
    }
}
