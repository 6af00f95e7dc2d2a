//! End-to-end pipeline tests over the in-memory collaborators.
//!
//! Each test wires the real services to `flashsale-testing` mocks and walks
//! an order through admission, fulfillment, and (where relevant)
//! compensation, asserting the invariants the system promises: stock never
//! oversold, one admission per buyer, terminal states immutable, dead
//! letters never lost.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use chrono::{TimeDelta, Utc};
use flashsale_core::store::StoreFuture;
use flashsale_core::{
    Clock, InventoryCache, MessageQueue, NewOrder, Order, OrderStatus, OrderStore,
    OrderTransaction, RejectReason, Sale, SaleProduct, SaleStatus, SaleStore,
};
use flashsale_runtime::RetryPolicy;
use flashsale_service::{
    AdmissionReply, Compensator, DEAD_LETTER_TOPIC, DeadLetterWorker, FulfillmentConfig,
    FulfillmentWorker, INTENT_TOPIC, IntakeService, OrderResult, ResultService, WarmupService,
};
use flashsale_testing::{
    FixedClock, InMemoryInventoryCache, InMemoryOrderStore, InMemoryQueue, InMemorySaleStore,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

struct Pipeline {
    cache: InMemoryInventoryCache,
    orders: InMemoryOrderStore,
    sales: InMemorySaleStore,
    queue: InMemoryQueue,
    clock: FixedClock,
    intake: IntakeService,
    worker: FulfillmentWorker,
    dlq_worker: DeadLetterWorker,
    results: ResultService,
    warmup: WarmupService,
}

const SALE_ID: i64 = 1;
const PRODUCT: &str = "p-1";

fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(1))
        .attempt_timeout(Duration::from_millis(200))
        .build()
}

/// A pipeline with one scheduled sale whose window opened a minute ago.
fn pipeline(stock: i64) -> Pipeline {
    let cache = InMemoryInventoryCache::new();
    let orders = InMemoryOrderStore::new();
    let queue = InMemoryQueue::new();
    let clock = FixedClock::new(Utc::now());
    let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
    let sales = InMemorySaleStore::new(Arc::clone(&clock_dyn));

    let now = clock.now();
    sales.add_sale(Sale {
        id: SALE_ID,
        name: "launch sale".to_string(),
        start_at: now - TimeDelta::minutes(1),
        end_at: now + TimeDelta::hours(1),
        status: SaleStatus::Scheduled,
        created_at: now,
        updated_at: now,
    });
    sales.add_product(SaleProduct {
        id: 1,
        sale_id: SALE_ID,
        product_id: PRODUCT.to_string(),
        sale_stock: stock,
        sale_price: 9900,
    });
    cache.set_stock(PRODUCT, stock);
    orders.set_stock(PRODUCT, stock);

    let cache_dyn: Arc<dyn InventoryCache> = Arc::new(cache.clone());
    let orders_dyn: Arc<dyn OrderStore> = Arc::new(orders.clone());
    let sales_dyn: Arc<dyn SaleStore> = Arc::new(sales.clone());
    let queue_dyn: Arc<dyn MessageQueue> = Arc::new(queue.clone());

    let intake = IntakeService::new(
        Arc::clone(&cache_dyn),
        Arc::clone(&orders_dyn),
        Arc::clone(&sales_dyn),
        Arc::clone(&queue_dyn),
        Arc::clone(&clock_dyn),
    );
    let worker = FulfillmentWorker::new(
        Arc::clone(&cache_dyn),
        Arc::clone(&orders_dyn),
        Arc::clone(&queue_dyn),
        Arc::clone(&clock_dyn),
        FulfillmentConfig {
            retry: fast_retry(),
            ..FulfillmentConfig::default()
        },
    );
    let dlq_worker = DeadLetterWorker::new(
        Compensator::new(Arc::clone(&cache_dyn), Arc::clone(&orders_dyn)),
        Arc::clone(&queue_dyn),
        DEAD_LETTER_TOPIC,
    );
    let results = ResultService::new(Arc::clone(&cache_dyn), Arc::clone(&orders_dyn));
    let warmup = WarmupService::new(
        Arc::clone(&cache_dyn),
        Arc::clone(&sales_dyn),
        Arc::clone(&clock_dyn),
    );

    Pipeline {
        cache,
        orders,
        sales,
        queue,
        clock,
        intake,
        worker,
        dlq_worker,
        results,
        warmup,
    }
}

impl Pipeline {
    async fn buy(&self, user_id: &str) -> AdmissionReply {
        self.intake
            .precheck_and_queue(user_id, PRODUCT)
            .await
            .expect("intake must not fail")
    }

    /// Pulls the next intent off the topic and runs it through the worker.
    async fn settle_next(&self) {
        let mut stream = self.queue.subscribe(INTENT_TOPIC).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        self.worker.handle_delivery(delivery).await.unwrap();
    }

    /// Pulls the next dead letter and runs it through the compensator.
    async fn compensate_next(&self) {
        let mut stream = self.queue.subscribe(DEAD_LETTER_TOPIC).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        self.dlq_worker.handle_delivery(delivery).await.unwrap();
    }
}

fn order_no(reply: &AdmissionReply) -> String {
    match reply {
        AdmissionReply::Queued { order_no } => order_no.clone(),
        AdmissionReply::Rejected { reason } => panic!("expected admission, got {reason}"),
    }
}

/// Reports every order as pending, standing in for a status read that lags
/// a concurrent write. Everything else delegates to the real ledger.
struct LaggingStatusStore {
    inner: Arc<dyn OrderStore>,
}

impl OrderStore for LaggingStatusStore {
    fn create_pending<'a>(&'a self, order: &'a NewOrder) -> StoreFuture<'a, ()> {
        self.inner.create_pending(order)
    }

    fn order_status<'a>(&'a self, _order_no: &'a str) -> StoreFuture<'a, Option<OrderStatus>> {
        Box::pin(async { Ok(Some(OrderStatus::Pending)) })
    }

    fn order_by_no<'a>(&'a self, order_no: &'a str) -> StoreFuture<'a, Option<Order>> {
        self.inner.order_by_no(order_no)
    }

    fn mark_failed<'a>(&'a self, order_no: &'a str, reason: &'a str) -> StoreFuture<'a, bool> {
        self.inner.mark_failed(order_no, reason)
    }

    fn begin(&self) -> StoreFuture<'_, Box<dyn OrderTransaction>> {
        self.inner.begin()
    }
}

#[tokio::test]
async fn stock_is_never_oversold() {
    let p = pipeline(3);
    let mut queued = 0;
    let mut out_of_stock = 0;

    for i in 0..5 {
        match p.buy(&format!("u-{i}")).await {
            AdmissionReply::Queued { .. } => queued += 1,
            AdmissionReply::Rejected {
                reason: RejectReason::OutOfStock,
            } => out_of_stock += 1,
            AdmissionReply::Rejected { reason } => panic!("unexpected rejection {reason}"),
        }
    }
    assert_eq!(queued, 3);
    assert_eq!(out_of_stock, 2);

    for _ in 0..3 {
        p.settle_next().await;
    }
    assert_eq!(p.orders.stock(PRODUCT), Some(0));
    assert_eq!(p.queue.acked(INTENT_TOPIC), 3);
}

#[tokio::test]
async fn one_admission_per_buyer() {
    let p = pipeline(10);

    assert!(matches!(p.buy("u-1").await, AdmissionReply::Queued { .. }));
    assert_eq!(
        p.buy("u-1").await,
        AdmissionReply::Rejected {
            reason: RejectReason::AlreadyPurchased
        }
    );
    // The duplicate attempt consumed no stock.
    assert_eq!(p.cache.stock(PRODUCT).await.unwrap(), Some(9));
}

#[tokio::test]
async fn exhausted_retries_dead_letter_then_compensate() {
    let p = pipeline(5);
    let reply = p.buy("u-1").await;
    let order_no = order_no(&reply);

    // Every transaction attempt fails; the worker gives up after three.
    p.orders.fail_next_begins(3);
    p.settle_next().await;

    assert_eq!(p.queue.acked(INTENT_TOPIC), 1);
    assert_eq!(p.queue.published(DEAD_LETTER_TOPIC).len(), 1);
    assert_eq!(
        p.orders.order_status(&order_no).await.unwrap(),
        Some(OrderStatus::Pending)
    );

    p.compensate_next().await;

    assert_eq!(
        p.orders.order_status(&order_no).await.unwrap(),
        Some(OrderStatus::Failed)
    );
    // The admitted unit went back to the counter: 5 - 1 + 1.
    assert_eq!(p.cache.stock(PRODUCT).await.unwrap(), Some(5));
    assert_eq!(
        p.cache.order_marker(&order_no).await.unwrap(),
        Some("failed".to_string())
    );
    assert_eq!(p.queue.acked(DEAD_LETTER_TOPIC), 1);
}

#[tokio::test]
async fn failed_dead_letter_publish_leaves_intent_unacked() {
    let p = pipeline(5);
    p.buy("u-1").await;

    p.orders.fail_next_begins(3);
    p.queue.fail_publishes_to(DEAD_LETTER_TOPIC);

    let mut stream = p.queue.subscribe(INTENT_TOPIC).await.unwrap();
    let delivery = stream.next().await.unwrap().unwrap();
    assert!(p.worker.handle_delivery(delivery).await.is_err());

    // Unacked: the broker will redeliver rather than lose the order.
    assert_eq!(p.queue.acked(INTENT_TOPIC), 0);
    assert!(p.queue.published(DEAD_LETTER_TOPIC).is_empty());
}

#[tokio::test]
async fn admission_closed_before_window_opens() {
    let p = pipeline(5);
    // Rewind to a second before the window opens.
    p.clock.set(p.clock.now() - TimeDelta::minutes(1) - TimeDelta::seconds(1));

    assert_eq!(
        p.buy("u-1").await,
        AdmissionReply::Rejected {
            reason: RejectReason::SaleNotStarted
        }
    );
}

#[tokio::test]
async fn stale_intents_are_dropped_without_effect() {
    let p = pipeline(5);
    p.buy("u-1").await;
    let payload = p.queue.published(INTENT_TOPIC)[0].clone();

    p.clock.advance(Duration::from_secs(2 * 60 * 60));
    p.worker.process(&payload).await.unwrap();

    // Nothing settled, nothing decremented durably.
    assert_eq!(p.orders.stock(PRODUCT), Some(5));
}

#[tokio::test]
async fn malformed_intents_are_acked_and_dropped() {
    let p = pipeline(5);
    p.queue
        .publish(INTENT_TOPIC, "k", b"not an intent")
        .await
        .unwrap();

    p.settle_next().await;

    // Unprocessable forever: acked, never dead-lettered, no effect.
    assert_eq!(p.queue.acked(INTENT_TOPIC), 1);
    assert!(p.queue.published(DEAD_LETTER_TOPIC).is_empty());
    assert_eq!(p.orders.stock(PRODUCT), Some(5));
}

#[tokio::test]
async fn malformed_dead_letters_are_acked_and_dropped() {
    let p = pipeline(5);
    p.queue
        .publish(DEAD_LETTER_TOPIC, "k", b"not a dead letter")
        .await
        .unwrap();

    p.compensate_next().await;

    assert_eq!(p.queue.acked(DEAD_LETTER_TOPIC), 1);
    // No compensation ran.
    assert_eq!(p.cache.stock(PRODUCT).await.unwrap(), Some(5));
}

#[tokio::test]
async fn settlement_race_loser_rolls_back_the_decrement() {
    let p = pipeline(5);
    let reply = p.buy("u-1").await;
    let order_no = order_no(&reply);
    let payload = p.queue.published(INTENT_TOPIC)[0].clone();

    // A compensator fails the order after the point where the worker's
    // idempotency check read it as pending.
    assert!(p.orders.mark_failed(&order_no, "gave up").await.unwrap());

    let lagging: Arc<dyn OrderStore> = Arc::new(LaggingStatusStore {
        inner: Arc::new(p.orders.clone()),
    });
    let worker = FulfillmentWorker::new(
        Arc::new(p.cache.clone()),
        lagging,
        Arc::new(p.queue.clone()),
        Arc::new(p.clock.clone()),
        FulfillmentConfig {
            retry: fast_retry(),
            ..FulfillmentConfig::default()
        },
    );

    worker.process(&payload).await.unwrap();

    // The guarded success mark refused the failed order, so the stock
    // decrement rolled back and the terminal state stands.
    assert_eq!(p.orders.stock(PRODUCT), Some(5));
    assert_eq!(
        p.orders.order_status(&order_no).await.unwrap(),
        Some(OrderStatus::Failed)
    );
}

#[tokio::test]
async fn redelivery_after_settlement_is_a_noop() {
    let p = pipeline(5);
    let reply = p.buy("u-1").await;
    let order_no = order_no(&reply);
    let payload = p.queue.published(INTENT_TOPIC)[0].clone();

    p.worker.process(&payload).await.unwrap();
    assert_eq!(p.orders.stock(PRODUCT), Some(4));

    // Redelivered after the order settled: no double decrement.
    p.worker.process(&payload).await.unwrap();
    assert_eq!(p.orders.stock(PRODUCT), Some(4));
    assert_eq!(
        p.orders.order_status(&order_no).await.unwrap(),
        Some(OrderStatus::Success)
    );
}

#[tokio::test]
async fn durable_stock_is_authoritative() {
    let p = pipeline(5);
    // Cache thinks a unit remains, the ledger disagrees.
    p.orders.set_stock(PRODUCT, 0);

    let reply = p.buy("u-1").await;
    let order_no = order_no(&reply);
    p.settle_next().await;

    assert_eq!(
        p.orders.order_status(&order_no).await.unwrap(),
        Some(OrderStatus::Failed)
    );
    assert_eq!(
        p.orders.fail_reason(&order_no).as_deref(),
        Some("OUT_OF_STOCK")
    );
    // Business rejection: acked, never dead-lettered.
    assert_eq!(p.queue.acked(INTENT_TOPIC), 1);
    assert!(p.queue.published(DEAD_LETTER_TOPIC).is_empty());
}

#[tokio::test]
async fn intent_without_admission_record_is_rejected() {
    let p = pipeline(5);
    let reply = p.buy("u-1").await;
    let order_no = order_no(&reply);

    // Simulate a lost admission record (e.g. cache flush).
    let forged = flashsale_core::OrderIntent::new(&order_no, "u-other", PRODUCT, p.clock.now());
    let err = p.worker.process(&forged.to_bytes().unwrap()).await.unwrap_err();
    assert_eq!(
        err,
        flashsale_core::ProcessError::Rejected(RejectReason::FinalizeRejected)
    );
    // No compensation for rejected intents.
    assert_eq!(p.orders.stock(PRODUCT), Some(5));
}

#[tokio::test]
async fn held_lock_is_a_transient_failure() {
    let p = pipeline(5);
    p.buy("u-1").await;
    let payload = p.queue.published(INTENT_TOPIC)[0].clone();

    p.cache.acquire_lock(PRODUCT, Duration::from_secs(5)).await.unwrap();
    let err = p.worker.process(&payload).await.unwrap_err();
    assert!(err.is_retryable());

    p.cache.release_lock(PRODUCT).await.unwrap();
    p.worker.process(&payload).await.unwrap();
}

#[tokio::test]
async fn result_lookup_covers_every_state() {
    let p = pipeline(5);
    let reply = p.buy("u-1").await;
    let order_no = order_no(&reply);

    assert_eq!(
        p.results.query(&order_no).await.unwrap(),
        OrderResult::Processing
    );

    p.settle_next().await;
    match p.results.query(&order_no).await.unwrap() {
        OrderResult::Succeeded(order) => {
            assert_eq!(order.order_no, order_no);
            assert_eq!(order.price, 9900);
        }
        other => panic!("expected success, got {other:?}"),
    }

    assert_eq!(
        p.results.query("no-such-order").await.unwrap(),
        OrderResult::NotFound
    );

    // Marker-only orders (ledger row not yet visible) read as processing.
    p.cache
        .set_order_marker("ord-lagging", "pending", Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(
        p.results.query("ord-lagging").await.unwrap(),
        OrderResult::Processing
    );
}

#[tokio::test]
async fn warmup_is_idempotent_and_advances_the_sale() {
    let cache = InMemoryInventoryCache::new();
    let clock = FixedClock::new(Utc::now());
    let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
    let sales = InMemorySaleStore::new(Arc::clone(&clock_dyn));
    let now = clock.now();
    sales.add_sale(Sale {
        id: SALE_ID,
        name: "launch sale".to_string(),
        start_at: now - TimeDelta::minutes(1),
        end_at: now + TimeDelta::hours(1),
        status: SaleStatus::Scheduled,
        created_at: now,
        updated_at: now,
    });
    sales.add_product(SaleProduct {
        id: 1,
        sale_id: SALE_ID,
        product_id: PRODUCT.to_string(),
        sale_stock: 7,
        sale_price: 9900,
    });

    let warmup = WarmupService::new(
        Arc::new(cache.clone()),
        Arc::new(sales.clone()),
        Arc::clone(&clock_dyn),
    );

    assert!(warmup.warm_up_by_id(SALE_ID).await.unwrap());
    assert_eq!(cache.stock(PRODUCT).await.unwrap(), Some(7));
    assert_eq!(
        sales.sale_by_id(SALE_ID).await.unwrap().unwrap().status,
        SaleStatus::Active
    );

    // A buyer takes a unit; the re-run must not resurrect it.
    cache.admit(PRODUCT, "u-1").await.unwrap();
    assert!(!warmup.warm_up_by_id(SALE_ID).await.unwrap());
    assert_eq!(cache.stock(PRODUCT).await.unwrap(), Some(6));

    // An ended sale is refused outright.
    clock.advance(Duration::from_secs(2 * 60 * 60));
    assert!(matches!(
        warmup.warm_up_by_id(SALE_ID).await,
        Err(flashsale_service::WarmupError::SaleEnded(SALE_ID))
    ));
}

#[tokio::test]
async fn warmup_refuses_unknown_sales() {
    let p = pipeline(5);
    assert!(matches!(
        p.warmup.warm_up_by_id(99).await,
        Err(flashsale_service::WarmupError::SaleNotFound(99))
    ));
    let _ = &p.sales;
}
