//! # Flashsale Core
//!
//! Core domain types and collaborator contracts for the flash-sale admission
//! and fulfillment pipeline.
//!
//! This crate defines WHAT the system talks about; the adapter crates
//! (`flashsale-redis`, `flashsale-postgres`, `flashsale-redpanda`) define HOW
//! each collaborator is reached, and `flashsale-service` orchestrates them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   admit (atomic script)   ┌───────────────┐
//! │  Intake  │──────────────────────────►│ InventoryCache│
//! │ Service  │                           └───────────────┘
//! └────┬─────┘ pending row + intent
//!      │
//!      ▼
//! ┌──────────┐   finalize + lock + tx    ┌───────────────┐
//! │ Message  │──────────────────────────►│  OrderStore   │
//! │  Queue   │   (Fulfillment Worker)    │ (durable)     │
//! └────┬─────┘                           └───────────────┘
//!      │ dead-letter on exhausted retries
//!      ▼
//! ┌──────────┐   restore stock + fail    ┌───────────────┐
//! │Compensa- │──────────────────────────►│ cache + store │
//! │   tor    │                           └───────────────┘
//! ```
//!
//! ## Key Principles
//!
//! - **Exactly-once-effective**: at most one order per buyer, stock never
//!   oversold, enforced by atomic cache scripts plus durable-store
//!   conditional updates.
//! - **At-least-once delivery**: every consumer is idempotent; redelivered
//!   intents short-circuit on terminal order status.
//! - **Tagged outcomes**: processing results are classified as
//!   [`outcome::ProcessError::Rejected`] (business, terminal),
//!   [`outcome::ProcessError::Transient`] (retry then dead-letter), or
//!   [`outcome::ProcessError::Permanent`] (ack and discard), so callers
//!   branch on outcome kind rather than sentinel identity.
//! - **Injected collaborators**: contracts are dyn-compatible traits held as
//!   `Arc<dyn …>`, resolved once at process startup.

pub mod cache;
pub mod clock;
pub mod domain;
pub mod message;
pub mod outcome;
pub mod queue;
pub mod store;

pub use cache::{AdmissionVerdict, CacheError, InventoryCache};
pub use clock::{Clock, SystemClock};
pub use domain::{NewOrder, Order, OrderStatus, Sale, SaleProduct, SaleStatus};
pub use message::{DeadLetter, IntentPayload, OrderIntent};
pub use outcome::{ProcessError, RejectReason};
pub use queue::{AckHandle, Delivery, DeliveryStream, MessageQueue, QueueError};
pub use store::{OrderStore, OrderTransaction, SaleStore, StoreError};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
