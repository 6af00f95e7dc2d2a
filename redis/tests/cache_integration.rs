//! Integration tests for [`RedisInventoryCache`] against a live Redis.
//!
//! Ignored by default because they require a running Redis at
//! `REDIS_URL` (default `redis://127.0.0.1:6379`). To run explicitly:
//!
//! ```bash
//! cargo test -p flashsale-redis --test cache_integration -- --ignored --test-threads=1
//! ```
//!
//! Each test namespaces its keys with a unique product id, so tests do not
//! interfere even on a shared instance.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use flashsale_core::{AdmissionVerdict, InventoryCache, RejectReason, SaleProduct};
use flashsale_redis::RedisInventoryCache;
use std::time::Duration;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn cache() -> RedisInventoryCache {
    RedisInventoryCache::connect(&redis_url())
        .await
        .expect("redis must be running for ignored integration tests")
}

fn product(product_id: &str, stock: i64) -> SaleProduct {
    SaleProduct {
        id: 1,
        sale_id: 1,
        product_id: product_id.to_string(),
        sale_stock: stock,
        sale_price: 9_900,
    }
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid_like())
}

fn uuid_like() -> u128 {
    // Nanosecond timestamp is unique enough for test key namespacing.
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos()
}

#[tokio::test]
#[ignore]
async fn admission_decrements_and_dedupes() {
    let cache = cache().await;
    let pid = unique("p-admit");
    cache
        .warm_up(&[product(&pid, 2)], Duration::from_secs(60))
        .await
        .expect("warm up");

    assert_eq!(
        cache.admit(&pid, "u-1").await.expect("admit"),
        AdmissionVerdict::Admitted
    );
    assert_eq!(cache.stock(&pid).await.expect("stock"), Some(1));

    // Same buyer again: refused without touching stock.
    assert_eq!(
        cache.admit(&pid, "u-1").await.expect("admit"),
        AdmissionVerdict::Rejected(RejectReason::AlreadyPurchased)
    );
    assert_eq!(cache.stock(&pid).await.expect("stock"), Some(1));
}

#[tokio::test]
#[ignore]
async fn admission_exhausts_stock() {
    let cache = cache().await;
    let pid = unique("p-stock");
    cache
        .warm_up(&[product(&pid, 1)], Duration::from_secs(60))
        .await
        .expect("warm up");

    assert_eq!(
        cache.admit(&pid, "u-1").await.expect("admit"),
        AdmissionVerdict::Admitted
    );
    assert_eq!(
        cache.admit(&pid, "u-2").await.expect("admit"),
        AdmissionVerdict::Rejected(RejectReason::OutOfStock)
    );
}

#[tokio::test]
#[ignore]
async fn admission_without_warmup_reports_missing_stock() {
    let cache = cache().await;
    let pid = unique("p-missing");
    assert_eq!(
        cache.admit(&pid, "u-1").await.expect("admit"),
        AdmissionVerdict::Rejected(RejectReason::StockNotFound)
    );
}

#[tokio::test]
#[ignore]
async fn finalize_reflects_admission_record() {
    let cache = cache().await;
    let pid = unique("p-finalize");
    cache
        .warm_up(&[product(&pid, 1)], Duration::from_secs(60))
        .await
        .expect("warm up");

    assert!(!cache.finalize(&pid, "u-1").await.expect("finalize"));
    cache.admit(&pid, "u-1").await.expect("admit");
    assert!(cache.finalize(&pid, "u-1").await.expect("finalize"));
    // Finalize mutates nothing; it still holds on a second call.
    assert!(cache.finalize(&pid, "u-1").await.expect("finalize"));
}

#[tokio::test]
#[ignore]
async fn warm_up_never_resets_live_counters() {
    let cache = cache().await;
    let pid = unique("p-warm");
    assert!(cache
        .warm_up(&[product(&pid, 5)], Duration::from_secs(60))
        .await
        .expect("warm up"));
    cache.admit(&pid, "u-1").await.expect("admit");

    assert!(!cache
        .warm_up(&[product(&pid, 5)], Duration::from_secs(60))
        .await
        .expect("warm up"));
    assert_eq!(cache.stock(&pid).await.expect("stock"), Some(4));
}

#[tokio::test]
#[ignore]
async fn lock_is_exclusive_until_released() {
    let cache = cache().await;
    let pid = unique("p-lock");
    let ttl = Duration::from_secs(5);

    assert!(cache.acquire_lock(&pid, ttl).await.expect("lock"));
    assert!(!cache.acquire_lock(&pid, ttl).await.expect("lock"));
    cache.release_lock(&pid).await.expect("unlock");
    assert!(cache.acquire_lock(&pid, ttl).await.expect("lock"));
}

#[tokio::test]
#[ignore]
async fn restore_stock_adds_units_back() {
    let cache = cache().await;
    let pid = unique("p-restore");
    cache
        .warm_up(&[product(&pid, 1)], Duration::from_secs(60))
        .await
        .expect("warm up");
    cache.admit(&pid, "u-1").await.expect("admit");
    assert_eq!(cache.stock(&pid).await.expect("stock"), Some(0));

    cache.restore_stock(&pid, 1).await.expect("restore");
    assert_eq!(cache.stock(&pid).await.expect("stock"), Some(1));
}

#[tokio::test]
#[ignore]
async fn order_marker_roundtrip() {
    let cache = cache().await;
    let order_no = unique("ord");

    assert_eq!(cache.order_marker(&order_no).await.expect("marker"), None);
    cache
        .set_order_marker(&order_no, "pending", Duration::from_secs(600))
        .await
        .expect("set marker");
    assert_eq!(
        cache.order_marker(&order_no).await.expect("marker"),
        Some("pending".to_string())
    );

    cache
        .set_order_marker(&order_no, "failed", Duration::from_secs(600))
        .await
        .expect("set marker");
    assert_eq!(
        cache.order_marker(&order_no).await.expect("marker"),
        Some("failed".to_string())
    );
}
