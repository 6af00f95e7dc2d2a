//! Durable store contracts.
//!
//! The store is the source of truth. All fulfillment writes go through an
//! [`OrderTransaction`]: a scoped resource that rolls back on drop unless
//! explicitly committed, so an error anywhere in the fulfillment sequence
//! leaves the ledger untouched.

use crate::domain::{NewOrder, Order, OrderStatus, Sale, SaleProduct, SaleStatus};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the durable store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Could not reach the database.
    #[error("store connection failed: {0}")]
    ConnectionFailed(String),

    /// A query or transaction failed.
    #[error("database error: {0}")]
    Database(String),

    /// A row the caller required does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Boxed future alias for the trait methods below.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Read and lifecycle operations on the sale catalog.
pub trait SaleStore: Send + Sync {
    /// The single sale whose window contains `now` with a non-ended status,
    /// if any.
    fn active_sale(&self) -> StoreFuture<'_, Option<Sale>>;

    /// Looks a sale up by id.
    fn sale_by_id(&self, sale_id: i64) -> StoreFuture<'_, Option<Sale>>;

    /// All product entries of a sale.
    fn sale_products(&self, sale_id: i64) -> StoreFuture<'_, Vec<SaleProduct>>;

    /// One product entry of a sale.
    fn sale_product<'a>(
        &'a self,
        sale_id: i64,
        product_id: &'a str,
    ) -> StoreFuture<'a, Option<SaleProduct>>;

    /// Conditionally advances a sale's status. Returns `false` when the
    /// sale was not in `from` (already advanced, or missing).
    fn update_sale_status(
        &self,
        sale_id: i64,
        from: SaleStatus,
        to: SaleStatus,
    ) -> StoreFuture<'_, bool>;
}

/// Order ledger operations.
pub trait OrderStore: Send + Sync {
    /// Inserts a pending order. Idempotent on the order number: a replayed
    /// insert is a silent no-op.
    fn create_pending<'a>(&'a self, order: &'a NewOrder) -> StoreFuture<'a, ()>;

    /// Current status of an order, if it exists.
    fn order_status<'a>(&'a self, order_no: &'a str) -> StoreFuture<'a, Option<OrderStatus>>;

    /// Full order row, if it exists.
    fn order_by_no<'a>(&'a self, order_no: &'a str) -> StoreFuture<'a, Option<Order>>;

    /// Marks an order failed, only if it is still pending. Returns whether
    /// a row changed.
    fn mark_failed<'a>(&'a self, order_no: &'a str, reason: &'a str) -> StoreFuture<'a, bool>;

    /// Opens a fulfillment transaction.
    fn begin(&self) -> StoreFuture<'_, Box<dyn OrderTransaction>>;
}

/// A scoped fulfillment transaction.
///
/// Dropping the transaction without calling [`commit`](Self::commit) rolls
/// back every operation performed through it.
pub trait OrderTransaction: Send {
    /// Decrements the sale stock of a product by `qty`, only if at least
    /// `qty` units remain. Returns whether a row changed.
    fn decrement_stock<'a>(&'a mut self, product_id: &'a str, qty: i64) -> StoreFuture<'a, bool>;

    /// Marks an order successful, only if it is still pending. Returns
    /// whether a row changed.
    fn mark_success<'a>(&'a mut self, order_no: &'a str) -> StoreFuture<'a, bool>;

    /// Marks an order failed, only if it is still pending. Returns whether
    /// a row changed.
    fn mark_failed<'a>(&'a mut self, order_no: &'a str, reason: &'a str) -> StoreFuture<'a, bool>;

    /// Commits the transaction, consuming it.
    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>>;
}
