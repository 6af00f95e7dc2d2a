//! # Flashsale Testing
//!
//! In-memory implementations of every collaborator contract, for
//! deterministic pipeline tests without Redis, Postgres, or a broker:
//!
//! - [`InMemoryInventoryCache`]: admission under a single lock, with the
//!   same atomicity the Lua script provides.
//! - [`InMemoryQueue`]: topic queues with ack accounting and publish
//!   failure injection.
//! - [`InMemoryOrderStore`]: a ledger whose transactions revert on drop
//!   unless committed, plus `begin` failure injection for
//!   compensation-path tests.
//! - [`InMemorySaleStore`]: a sale catalog driven by an injected clock.
//! - [`FixedClock`]: settable time shared across clones.

pub mod cache;
pub mod clock;
pub mod queue;
pub mod store;

pub use cache::InMemoryInventoryCache;
pub use clock::FixedClock;
pub use queue::InMemoryQueue;
pub use store::{InMemoryOrderStore, InMemorySaleStore};
