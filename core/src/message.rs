//! Broker wire messages.
//!
//! Field names and nesting are part of the wire contract shared with the
//! dead-letter tooling, so both structs pin them with serde attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The intent published to the broker after a successful admission.
///
/// Carries everything the fulfillment worker needs so it never has to call
/// back into the intake path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Order number minted at intake. Wire name kept as `order_id`.
    #[serde(rename = "order_id")]
    pub order_no: String,
    /// Buyer identity.
    pub user_id: String,
    /// Product identity; also the partition key for per-product ordering.
    pub product_id: String,
    /// Unix seconds at admission time; drives the staleness guard.
    pub timestamp: i64,
}

impl OrderIntent {
    /// Builds an intent stamped with `now`.
    #[must_use]
    pub fn new(
        order_no: impl Into<String>,
        user_id: impl Into<String>,
        product_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_no: order_no.into(),
            user_id: user_id.into(),
            product_id: product_id.into(),
            timestamp: now.timestamp(),
        }
    }

    /// Age of this intent relative to `now`, in whole seconds. Negative
    /// clock skew clamps to zero.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now.timestamp() - self.timestamp).max(0)
    }

    /// Serializes to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns the underlying error when serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes from the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns the underlying error for malformed payloads; consumers treat
    /// that as a permanent failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// The original intent identifiers, nested inside a dead letter so the
/// compensator never re-parses broker payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentPayload {
    /// Order number of the failed intent.
    pub order_no: String,
    /// Buyer identity.
    pub user_id: String,
    /// Product identity.
    pub product_id: String,
}

/// The message published to the dead-letter topic after retries are
/// exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Order number, duplicated at the top level for log scraping.
    pub order_no: String,
    /// Final error string from the last attempt.
    pub reason: String,
    /// The identifiers of the failed intent.
    pub payload: IntentPayload,
}

impl DeadLetter {
    /// Wraps a failed intent with the final failure reason.
    #[must_use]
    pub fn from_intent(intent: &OrderIntent, reason: impl Into<String>) -> Self {
        Self {
            order_no: intent.order_no.clone(),
            reason: reason.into(),
            payload: IntentPayload {
                order_no: intent.order_no.clone(),
                user_id: intent.user_id.clone(),
                product_id: intent.product_id.clone(),
            },
        }
    }

    /// Serializes to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns the underlying error when serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes from the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns the underlying error for malformed payloads.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn intent_wire_format_uses_order_id() {
        let now = Utc::now();
        let intent = OrderIntent::new("ord-1", "u-1", "p-1", now);
        let json: serde_json::Value =
            serde_json::from_slice(&intent.to_bytes().unwrap()).unwrap();

        assert_eq!(json["order_id"], "ord-1");
        assert_eq!(json["user_id"], "u-1");
        assert_eq!(json["product_id"], "p-1");
        assert_eq!(json["timestamp"], now.timestamp());
    }

    #[test]
    fn intent_roundtrip() {
        let intent = OrderIntent::new("ord-2", "u-2", "p-2", Utc::now());
        let parsed = OrderIntent::from_bytes(&intent.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, intent);
    }

    #[test]
    fn malformed_intent_is_an_error() {
        assert!(OrderIntent::from_bytes(b"not json").is_err());
        assert!(OrderIntent::from_bytes(b"{\"order_id\": 7}").is_err());
    }

    #[test]
    fn age_clamps_clock_skew() {
        let now = Utc::now();
        let intent = OrderIntent::new("ord-3", "u-3", "p-3", now + TimeDelta::seconds(30));
        assert_eq!(intent.age_secs(now), 0);
        assert_eq!(intent.age_secs(now + TimeDelta::seconds(90)), 60);
    }

    #[test]
    fn dead_letter_nests_intent_identifiers() {
        let intent = OrderIntent::new("ord-4", "u-4", "p-4", Utc::now());
        let dl = DeadLetter::from_intent(&intent, "database unavailable");
        let json: serde_json::Value =
            serde_json::from_slice(&dl.to_bytes().unwrap()).unwrap();

        assert_eq!(json["order_no"], "ord-4");
        assert_eq!(json["reason"], "database unavailable");
        assert_eq!(json["payload"]["order_no"], "ord-4");
        assert_eq!(json["payload"]["user_id"], "u-4");
        assert_eq!(json["payload"]["product_id"], "p-4");
    }
}
