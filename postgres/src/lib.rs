//! # Flashsale Postgres
//!
//! `PostgreSQL` implementation of the durable store contracts.
//!
//! The ledger is the source of truth for orders and the sale catalog. All
//! fulfillment writes run inside a [`sqlx`] transaction wrapped in
//! [`PgOrderTransaction`], which rolls back on drop unless committed, so a
//! worker crash or error mid-fulfillment leaves no partial writes.
//!
//! Queries use runtime binding rather than the compile-time macros, so the
//! crate builds without a live database.

pub mod order_store;
pub mod sale_store;

pub use order_store::PostgresOrderStore;
pub use sale_store::PostgresSaleStore;

use flashsale_core::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Opens a connection pool against the given database URL.
///
/// # Errors
///
/// Returns [`StoreError::ConnectionFailed`] when the database is
/// unreachable.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::ConnectionFailed(e.to_string()))
}

pub(crate) fn db_err(e: &sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}
