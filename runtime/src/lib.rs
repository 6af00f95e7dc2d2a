//! # Flashsale Runtime
//!
//! Worker-loop primitives shared by the pipeline consumers: retry with
//! exponential backoff and a retryability predicate, per-attempt timeouts,
//! and a cooperative shutdown signal checked between message pulls.

pub mod retry;
pub mod shutdown;

pub use retry::{RetryPolicy, retry_with_predicate};
pub use shutdown::{Shutdown, ShutdownController};
