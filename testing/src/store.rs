//! In-memory durable store.
//!
//! The order ledger honors the same semantics as the SQL implementation:
//! idempotent pending inserts, one-way status transitions, guarded stock
//! decrements, and transactions that revert on drop unless committed.

use chrono::Utc;
use flashsale_core::store::StoreFuture;
use flashsale_core::{
    Clock, NewOrder, Order, OrderStatus, OrderStore, OrderTransaction, Sale, SaleProduct,
    SaleStatus, SaleStore, StoreError,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct LedgerState {
    orders: HashMap<String, Order>,
    fail_reasons: HashMap<String, String>,
    stock: HashMap<String, i64>,
    next_id: i64,
    fail_begins: u32,
}

/// Order ledger held in memory.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryOrderStore {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds the durable sale stock for a product.
    pub fn set_stock(&self, product_id: &str, qty: i64) {
        self.lock().stock.insert(product_id.to_string(), qty);
    }

    /// Current durable sale stock for a product.
    #[must_use]
    pub fn stock(&self, product_id: &str) -> Option<i64> {
        self.lock().stock.get(product_id).copied()
    }

    /// Makes the next `n` calls to `begin` fail, for compensation-path
    /// tests.
    pub fn fail_next_begins(&self, n: u32) {
        self.lock().fail_begins = n;
    }

    /// Recorded failure reason for an order, if any.
    #[must_use]
    pub fn fail_reason(&self, order_no: &str) -> Option<String> {
        self.lock().fail_reasons.get(order_no).cloned()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn create_pending<'a>(&'a self, order: &'a NewOrder) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.orders.contains_key(&order.order_no) {
                return Ok(());
            }
            state.next_id += 1;
            let id = state.next_id;
            state.orders.insert(
                order.order_no.clone(),
                Order {
                    id,
                    order_no: order.order_no.clone(),
                    user_id: order.user_id.clone(),
                    product_id: order.product_id.clone(),
                    sale_id: order.sale_id,
                    price: order.price,
                    status: OrderStatus::Pending,
                    created_at: Utc::now(),
                    paid_at: None,
                    canceled_at: None,
                },
            );
            Ok(())
        })
    }

    fn order_status<'a>(&'a self, order_no: &'a str) -> StoreFuture<'a, Option<OrderStatus>> {
        Box::pin(async move { Ok(self.lock().orders.get(order_no).map(|o| o.status)) })
    }

    fn order_by_no<'a>(&'a self, order_no: &'a str) -> StoreFuture<'a, Option<Order>> {
        Box::pin(async move { Ok(self.lock().orders.get(order_no).cloned()) })
    }

    fn mark_failed<'a>(&'a self, order_no: &'a str, reason: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.lock();
            let Some(order) = state.orders.get_mut(order_no) else {
                return Ok(false);
            };
            if order.status != OrderStatus::Pending {
                return Ok(false);
            }
            order.status = OrderStatus::Failed;
            order.canceled_at = Some(Utc::now());
            state
                .fail_reasons
                .insert(order_no.to_string(), reason.to_string());
            Ok(true)
        })
    }

    fn begin(&self) -> StoreFuture<'_, Box<dyn OrderTransaction>> {
        Box::pin(async move {
            {
                let mut state = self.lock();
                if state.fail_begins > 0 {
                    state.fail_begins -= 1;
                    return Err(StoreError::Database(
                        "injected transaction failure".to_string(),
                    ));
                }
            }
            Ok(Box::new(MemTransaction {
                state: Arc::clone(&self.state),
                undo: Vec::new(),
                committed: false,
            }) as Box<dyn OrderTransaction>)
        })
    }
}

enum Undo {
    RestoreStock { product_id: String, qty: i64 },
    ResetOrder { order_no: String },
}

/// Transaction over the in-memory ledger. Operations apply eagerly and are
/// reverted in reverse order on drop unless the transaction was committed.
struct MemTransaction {
    state: Arc<Mutex<LedgerState>>,
    undo: Vec<Undo>,
    committed: bool,
}

impl MemTransaction {
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OrderTransaction for MemTransaction {
    fn decrement_stock<'a>(&'a mut self, product_id: &'a str, qty: i64) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let changed = {
                let mut state = self.lock();
                match state.stock.get_mut(product_id) {
                    Some(stock) if *stock >= qty => {
                        *stock -= qty;
                        true
                    }
                    _ => false,
                }
            };
            if changed {
                self.undo.push(Undo::RestoreStock {
                    product_id: product_id.to_string(),
                    qty,
                });
            }
            Ok(changed)
        })
    }

    fn mark_success<'a>(&'a mut self, order_no: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let changed = {
                let mut state = self.lock();
                match state.orders.get_mut(order_no) {
                    Some(order) if order.status == OrderStatus::Pending => {
                        order.status = OrderStatus::Success;
                        order.paid_at = Some(Utc::now());
                        true
                    }
                    _ => false,
                }
            };
            if changed {
                self.undo.push(Undo::ResetOrder {
                    order_no: order_no.to_string(),
                });
            }
            Ok(changed)
        })
    }

    fn mark_failed<'a>(&'a mut self, order_no: &'a str, reason: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let changed = {
                let mut state = self.lock();
                let changed = match state.orders.get_mut(order_no) {
                    Some(order) if order.status == OrderStatus::Pending => {
                        order.status = OrderStatus::Failed;
                        order.canceled_at = Some(Utc::now());
                        true
                    }
                    _ => false,
                };
                if changed {
                    state
                        .fail_reasons
                        .insert(order_no.to_string(), reason.to_string());
                }
                changed
            };
            if changed {
                self.undo.push(Undo::ResetOrder {
                    order_no: order_no.to_string(),
                });
            }
            Ok(changed)
        })
    }

    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>> {
        Box::pin(async move {
            let mut this = self;
            this.committed = true;
            Ok(())
        })
    }
}

impl Drop for MemTransaction {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for op in self.undo.drain(..).rev() {
            match op {
                Undo::RestoreStock { product_id, qty } => {
                    *state.stock.entry(product_id).or_insert(0) += qty;
                }
                Undo::ResetOrder { order_no } => {
                    if let Some(order) = state.orders.get_mut(&order_no) {
                        order.status = OrderStatus::Pending;
                        order.paid_at = None;
                        order.canceled_at = None;
                    }
                    state.fail_reasons.remove(&order_no);
                }
            }
        }
    }
}

#[derive(Default)]
struct CatalogState {
    sales: Vec<Sale>,
    products: Vec<SaleProduct>,
}

/// Sale catalog held in memory, with an injected clock driving the
/// active-sale window query.
#[derive(Clone)]
pub struct InMemorySaleStore {
    state: Arc<Mutex<CatalogState>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySaleStore {
    /// Creates an empty catalog reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CatalogState::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a sale to the catalog.
    pub fn add_sale(&self, sale: Sale) {
        self.lock().sales.push(sale);
    }

    /// Adds a product entry to the catalog.
    pub fn add_product(&self, product: SaleProduct) {
        self.lock().products.push(product);
    }
}

impl SaleStore for InMemorySaleStore {
    fn active_sale(&self) -> StoreFuture<'_, Option<Sale>> {
        Box::pin(async move {
            let now = self.clock.now();
            Ok(self
                .lock()
                .sales
                .iter()
                .find(|s| s.status != SaleStatus::Ended && s.is_in_window(now))
                .cloned())
        })
    }

    fn sale_by_id(&self, sale_id: i64) -> StoreFuture<'_, Option<Sale>> {
        Box::pin(async move { Ok(self.lock().sales.iter().find(|s| s.id == sale_id).cloned()) })
    }

    fn sale_products(&self, sale_id: i64) -> StoreFuture<'_, Vec<SaleProduct>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .products
                .iter()
                .filter(|p| p.sale_id == sale_id)
                .cloned()
                .collect())
        })
    }

    fn sale_product<'a>(
        &'a self,
        sale_id: i64,
        product_id: &'a str,
    ) -> StoreFuture<'a, Option<SaleProduct>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .products
                .iter()
                .find(|p| p.sale_id == sale_id && p.product_id == product_id)
                .cloned())
        })
    }

    fn update_sale_status(
        &self,
        sale_id: i64,
        from: SaleStatus,
        to: SaleStatus,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.lock();
            match state
                .sales
                .iter_mut()
                .find(|s| s.id == sale_id && s.status == from)
            {
                Some(sale) => {
                    sale.status = to;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }
}
