//! Inventory cache contract.
//!
//! The cache is the hot path: admission decisions are made here with a single
//! atomic script call, and the durable store is only touched afterwards by
//! the async pipeline. Methods return `Pin<Box<dyn Future>>` so the trait
//! stays dyn-compatible and implementations can be injected as
//! `Arc<dyn InventoryCache>`.

use crate::domain::{Sale, SaleProduct};
use crate::outcome::RejectReason;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors from the inventory cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Could not reach the cache.
    #[error("cache connection failed: {0}")]
    ConnectionFailed(String),

    /// A command was rejected or failed mid-flight.
    #[error("cache command failed: {0}")]
    CommandFailed(String),

    /// A server-side script failed to load or run.
    #[error("cache script failed: {0}")]
    ScriptFailed(String),

    /// The cache replied with a shape the client does not understand.
    #[error("unexpected cache reply: {0}")]
    UnexpectedReply(String),
}

/// The result of the atomic admission script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionVerdict {
    /// Stock decremented and the buyer recorded; proceed to queue an intent.
    Admitted,
    /// Refused; the reason is terminal for this request.
    Rejected(RejectReason),
}

/// Boxed future alias for the trait methods below.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Hot-path inventory operations.
///
/// Admission is the only mutating call on the request path; everything else
/// serves the async pipeline and operational tooling.
pub trait InventoryCache: Send + Sync {
    /// Runs the atomic admission script: stock check, duplicate-buyer check,
    /// decrement and record, all in one step.
    fn admit<'a>(&'a self, product_id: &'a str, user_id: &'a str) -> CacheFuture<'a, AdmissionVerdict>;

    /// Re-checks at fulfillment time that the buyer holds an admission
    /// record for the product. Mutates nothing.
    fn finalize<'a>(&'a self, product_id: &'a str, user_id: &'a str) -> CacheFuture<'a, bool>;

    /// Returns `qty` units to the stock counter (compensation).
    fn restore_stock<'a>(&'a self, product_id: &'a str, qty: i64) -> CacheFuture<'a, ()>;

    /// Current counter value, if the key exists.
    fn stock<'a>(&'a self, product_id: &'a str) -> CacheFuture<'a, Option<i64>>;

    /// Seeds stock counters for a sale's products with the given TTL.
    /// Returns `false` without writing anything when a counter already
    /// exists, so a re-run never resets live counters.
    fn warm_up<'a>(&'a self, products: &'a [SaleProduct], ttl: Duration) -> CacheFuture<'a, bool>;

    /// Caches the active sale record for fast window checks.
    fn put_active_sale<'a>(&'a self, sale: &'a Sale, ttl: Duration) -> CacheFuture<'a, ()>;

    /// Reads the cached active sale record, if present.
    fn active_sale(&self) -> CacheFuture<'_, Option<Sale>>;

    /// Tries to take the per-product fulfillment lock. Returns `false` when
    /// another worker holds it.
    fn acquire_lock<'a>(&'a self, product_id: &'a str, ttl: Duration) -> CacheFuture<'a, bool>;

    /// Releases the per-product fulfillment lock.
    fn release_lock<'a>(&'a self, product_id: &'a str) -> CacheFuture<'a, ()>;

    /// Writes the short-lived order status marker consulted while the
    /// ledger row is still pending.
    fn set_order_marker<'a>(
        &'a self,
        order_no: &'a str,
        status: &'a str,
        ttl: Duration,
    ) -> CacheFuture<'a, ()>;

    /// Reads the order status marker, if it has not expired.
    fn order_marker<'a>(&'a self, order_no: &'a str) -> CacheFuture<'a, Option<String>>;
}
