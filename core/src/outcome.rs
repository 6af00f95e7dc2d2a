//! Outcome taxonomy for message processing.
//!
//! Every processing failure is tagged with how the consumer loop must react:
//! business rejections are terminal and acked, transient faults are retried
//! and eventually dead-lettered, permanent faults are acked and dropped.

use thiserror::Error;

/// Business reasons an order is refused, at admission or fulfillment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The sale window has not opened (or the sale is over or unknown).
    SaleNotStarted,
    /// No stock counter exists for the product; warm-up never ran.
    StockNotFound,
    /// The stock counter is exhausted.
    OutOfStock,
    /// The buyer already holds an admission for this product.
    AlreadyPurchased,
    /// The fulfillment-time membership check found no admission record.
    FinalizeRejected,
}

impl RejectReason {
    /// Stable identifier used in replies, logs, and dead letters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SaleNotStarted => "not_started",
            Self::StockNotFound => "STOCK_NOT_FOUND",
            Self::OutOfStock => "OUT_OF_STOCK",
            Self::AlreadyPurchased => "USER_ALREADY_PURCHASED",
            Self::FinalizeRejected => "lua_reject",
        }
    }

    /// Maps a reason string returned by the admission script.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "STOCK_NOT_FOUND" => Some(Self::StockNotFound),
            "OUT_OF_STOCK" => Some(Self::OutOfStock),
            "USER_ALREADY_PURCHASED" => Some(Self::AlreadyPurchased),
            _ => None,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A processing failure tagged with its consumer-loop policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// Business rejection. Terminal; ack without retry or compensation.
    #[error("rejected: {0}")]
    Rejected(RejectReason),

    /// Infrastructure fault that may clear. Retry, then dead-letter.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unrecoverable input (e.g. malformed payload). Ack and drop.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ProcessError {
    /// Whether the consumer loop should attempt this message again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ProcessError::Transient("broker down".into()).is_retryable());
        assert!(!ProcessError::Rejected(RejectReason::OutOfStock).is_retryable());
        assert!(!ProcessError::Permanent("bad payload".into()).is_retryable());
    }

    #[test]
    fn wire_reasons_roundtrip() {
        for reason in [
            RejectReason::StockNotFound,
            RejectReason::OutOfStock,
            RejectReason::AlreadyPurchased,
        ] {
            assert_eq!(RejectReason::from_wire(reason.as_str()), Some(reason));
        }
        assert_eq!(RejectReason::from_wire("SOMETHING_ELSE"), None);
    }

    #[test]
    fn non_wire_reasons_have_stable_identifiers() {
        assert_eq!(RejectReason::SaleNotStarted.as_str(), "not_started");
        assert_eq!(RejectReason::FinalizeRejected.as_str(), "lua_reject");
    }
}
