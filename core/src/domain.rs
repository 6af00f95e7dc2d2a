//! Domain model for sales, sale products, and orders.
//!
//! The durable store is the source of truth for all of these; the inventory
//! cache holds derived, TTL-bounded projections (stock counters, purchased
//! sets, the active-sale record).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Extra lifetime granted to cache keys past the sale end, so late-processing
/// queue messages still find their counters.
pub const SALE_TTL_BUFFER: Duration = Duration::from_secs(60 * 60);

/// Lifecycle status of a sale.
///
/// Transitions: an external admin process creates sales as `scheduled`;
/// warm-up flips `scheduled` to `active` when it runs inside the sale window;
/// `ended` is reached by time passing (and may be persisted lazily).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    /// Created but not yet warmed up.
    Scheduled,
    /// Warmed up and inside (or approaching) its window.
    Active,
    /// Past its window; no admission may succeed.
    Ended,
}

impl SaleStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

/// A time-boxed sale event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    /// Ledger identity.
    pub id: i64,
    /// Human-readable name.
    pub name: String,
    /// Start of the sale window (inclusive).
    pub start_at: DateTime<Utc>,
    /// End of the sale window (exclusive).
    pub end_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: SaleStatus,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row update time.
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    /// Strictly checks the clock against the `[start_at, end_at)` window.
    #[must_use]
    pub fn is_in_window(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_at && now < self.end_at
    }

    /// Checks both status and clock: admission may only succeed while this
    /// holds.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, SaleStatus::Scheduled | SaleStatus::Active) && self.is_in_window(now)
    }

    /// Cache expiration for this sale's keys: time to `end_at` plus
    /// [`SALE_TTL_BUFFER`]. Zero once the sale has ended, so stale counters
    /// self-expire if sale parameters change.
    #[must_use]
    pub fn cache_ttl(&self, now: DateTime<Utc>) -> Duration {
        if now >= self.end_at {
            return Duration::ZERO;
        }
        let remaining = (self.end_at - now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        remaining + SALE_TTL_BUFFER
    }
}

/// A product entry within a sale, with its promotional price and the stock
/// allotted to the sale (distinct from the product's base catalog stock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleProduct {
    /// Ledger identity.
    pub id: i64,
    /// Owning sale.
    pub sale_id: i64,
    /// Product identity (opaque to this system).
    pub product_id: String,
    /// Units allotted to this sale.
    pub sale_stock: i64,
    /// Promotional price, in minor units.
    pub sale_price: i64,
}

/// Terminal-state machine for an order.
///
/// Transitions are one-way: `pending → success` or `pending → failed`.
/// Nothing ever transitions out of a terminal state; the idempotency checks
/// in the fulfillment worker and compensator rely on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Admitted, awaiting fulfillment.
    Pending,
    /// Durably committed; stock decremented.
    Success,
    /// Terminal failure; reservation was (or will be) compensated.
    Failed,
}

impl OrderStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this status accepts no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// An order row in the durable ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Ledger identity.
    pub id: i64,
    /// Externally-visible order number; globally unique and immutable.
    pub order_no: String,
    /// Buyer identity.
    pub user_id: String,
    /// Product identity.
    pub product_id: String,
    /// Sale this order was admitted under.
    pub sale_id: i64,
    /// Promotional price captured at admission time, in minor units.
    pub price: i64,
    /// Current status.
    pub status: OrderStatus,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Set when the order reached `success`.
    pub paid_at: Option<DateTime<Utc>>,
    /// Set when the order reached `failed`.
    pub canceled_at: Option<DateTime<Utc>>,
}

/// The fields needed to create a pending order at admission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    /// Freshly generated, globally-unique order number.
    pub order_no: String,
    /// Buyer identity.
    pub user_id: String,
    /// Product identity.
    pub product_id: String,
    /// Sale this order is admitted under.
    pub sale_id: i64,
    /// Promotional price, in minor units.
    pub price: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use proptest::prelude::*;

    fn sale(start: DateTime<Utc>, end: DateTime<Utc>, status: SaleStatus) -> Sale {
        Sale {
            id: 1,
            name: "test sale".to_string(),
            start_at: start,
            end_at: end,
            status,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn window_is_half_open() {
        let start = Utc::now();
        let end = start + TimeDelta::hours(1);
        let s = sale(start, end, SaleStatus::Active);

        assert!(!s.is_in_window(start - TimeDelta::seconds(1)));
        assert!(s.is_in_window(start));
        assert!(s.is_in_window(end - TimeDelta::seconds(1)));
        assert!(!s.is_in_window(end));
    }

    #[test]
    fn scheduled_sale_in_window_is_active() {
        let start = Utc::now();
        let end = start + TimeDelta::hours(1);
        let s = sale(start, end, SaleStatus::Scheduled);
        assert!(s.is_active(start));
    }

    #[test]
    fn ended_sale_is_never_active() {
        let start = Utc::now();
        let end = start + TimeDelta::hours(1);
        let s = sale(start, end, SaleStatus::Ended);
        assert!(!s.is_active(start));
    }

    #[test]
    fn cache_ttl_includes_safety_buffer() {
        let start = Utc::now();
        let end = start + TimeDelta::hours(1);
        let s = sale(start, end, SaleStatus::Active);

        let ttl = s.cache_ttl(start);
        assert_eq!(ttl, Duration::from_secs(3600) + SALE_TTL_BUFFER);
    }

    #[test]
    fn cache_ttl_is_zero_after_end() {
        let start = Utc::now();
        let end = start + TimeDelta::hours(1);
        let s = sale(start, end, SaleStatus::Active);
        assert_eq!(s.cache_ttl(end), Duration::ZERO);
        assert_eq!(s.cache_ttl(end + TimeDelta::hours(2)), Duration::ZERO);
    }

    #[test]
    fn order_status_roundtrip() {
        for status in [OrderStatus::Pending, OrderStatus::Success, OrderStatus::Failed] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("shipped"), None);
    }

    #[test]
    fn sale_status_roundtrip() {
        for status in [SaleStatus::Scheduled, SaleStatus::Active, SaleStatus::Ended] {
            assert_eq!(SaleStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SaleStatus::parse("paused"), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Success.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }

    proptest! {
        #[test]
        fn active_implies_in_window(offset_secs in -7200i64..7200) {
            let start = Utc::now();
            let end = start + TimeDelta::hours(1);
            let s = sale(start, end, SaleStatus::Active);
            let now = start + TimeDelta::seconds(offset_secs);
            prop_assert!(!s.is_active(now) || s.is_in_window(now));
        }
    }
}
