//! # Flashsale Service
//!
//! The pipeline services, each generic over the contracts in
//! `flashsale-core` and injected with its collaborators once at startup:
//!
//! - [`IntakeService`]: the request path. Gates on the sale window, runs the
//!   atomic cache admission, creates the pending ledger row, and publishes
//!   the order intent.
//! - [`FulfillmentWorker`]: consumes intents, re-checks the admission,
//!   and settles the order durably inside a transaction. Retries transient
//!   faults, dead-letters them when exhausted.
//! - [`Compensator`] and [`DeadLetterWorker`]: consume dead letters, fail
//!   the order, and return its reserved unit to the cache.
//! - [`ResultService`]: order status lookups for polling buyers.
//! - [`WarmupService`]: seeds stock counters before a sale opens.

pub mod compensator;
pub mod fulfillment;
pub mod intake;
pub mod result;
pub mod warmup;

pub use compensator::{Compensator, DeadLetterWorker};
pub use fulfillment::{FulfillmentConfig, FulfillmentWorker};
pub use intake::{AdmissionReply, IntakeError, IntakeService};
pub use result::{OrderResult, ResultService};
pub use warmup::{WarmupError, WarmupService};

use std::time::Duration;

/// Default topic carrying order intents.
pub const INTENT_TOPIC: &str = "flashsale.orders";

/// Default topic carrying dead letters.
pub const DEAD_LETTER_TOPIC: &str = "flashsale.orders.dlq";

/// Lifetime of the order status marker written at intake.
pub const ORDER_MARKER_TTL: Duration = Duration::from_secs(600);
