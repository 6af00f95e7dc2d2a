//! Order ledger operations and the fulfillment transaction.

use crate::db_err;
use flashsale_core::store::StoreFuture;
use flashsale_core::{NewOrder, Order, OrderStatus, OrderStore, OrderTransaction, StoreError};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::pin::Pin;

/// Order ledger backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(s: &str) -> Result<OrderStatus, StoreError> {
    OrderStatus::parse(s)
        .ok_or_else(|| StoreError::Database(format!("invalid order status '{s}'")))
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, StoreError> {
    let status_str: String = row.get("status");
    Ok(Order {
        id: row.get("id"),
        order_no: row.get("order_no"),
        user_id: row.get("user_id"),
        product_id: row.get("product_id"),
        sale_id: row.get("sale_id"),
        price: row.get("price"),
        status: parse_status(&status_str)?,
        created_at: row.get("created_at"),
        paid_at: row.get("paid_at"),
        canceled_at: row.get("canceled_at"),
    })
}

impl OrderStore for PostgresOrderStore {
    fn create_pending<'a>(&'a self, order: &'a NewOrder) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            // ON CONFLICT makes the insert a no-op for a replayed order
            // number, so intake retries cannot duplicate rows.
            sqlx::query(
                r"
                INSERT INTO orders (order_no, user_id, product_id, sale_id, price, status)
                VALUES ($1, $2, $3, $4, $5, 'pending')
                ON CONFLICT (order_no) DO NOTHING
                ",
            )
            .bind(&order.order_no)
            .bind(&order.user_id)
            .bind(&order.product_id)
            .bind(order.sale_id)
            .bind(order.price)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

            tracing::info!(order_no = %order.order_no, user_id = %order.user_id, "pending order created");
            Ok(())
        })
    }

    fn order_status<'a>(&'a self, order_no: &'a str) -> StoreFuture<'a, Option<OrderStatus>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT status FROM orders WHERE order_no = $1")
                .bind(order_no)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_err(&e))?;

            row.map(|r| parse_status(&r.get::<String, _>("status")))
                .transpose()
        })
    }

    fn order_by_no<'a>(&'a self, order_no: &'a str) -> StoreFuture<'a, Option<Order>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, order_no, user_id, product_id, sale_id, price, status,
                       created_at, paid_at, canceled_at
                FROM orders
                WHERE order_no = $1
                ",
            )
            .bind(order_no)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

            row.as_ref().map(row_to_order).transpose()
        })
    }

    fn mark_failed<'a>(&'a self, order_no: &'a str, reason: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE orders
                SET status = 'failed', fail_reason = $2, canceled_at = NOW()
                WHERE order_no = $1 AND status = 'pending'
                ",
            )
            .bind(order_no)
            .bind(reason)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn begin(&self) -> StoreFuture<'_, Box<dyn OrderTransaction>> {
        Box::pin(async move {
            let tx = self.pool.begin().await.map_err(|e| db_err(&e))?;
            Ok(Box::new(PgOrderTransaction { tx }) as Box<dyn OrderTransaction>)
        })
    }
}

/// A fulfillment transaction over a `PostgreSQL` connection.
///
/// Dropping it without commit rolls the transaction back, inheriting the
/// drop behavior of [`sqlx::Transaction`].
pub struct PgOrderTransaction {
    tx: Transaction<'static, Postgres>,
}

impl OrderTransaction for PgOrderTransaction {
    fn decrement_stock<'a>(&'a mut self, product_id: &'a str, qty: i64) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            // Guarded decrement: zero rows when remaining stock is short,
            // which the caller treats as durably out of stock.
            let result = sqlx::query(
                r"
                UPDATE flash_sale_products
                SET sale_stock = sale_stock - $2
                WHERE product_id = $1 AND sale_stock >= $2
                ",
            )
            .bind(product_id)
            .bind(qty)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err(&e))?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn mark_success<'a>(&'a mut self, order_no: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE orders
                SET status = 'success', paid_at = NOW()
                WHERE order_no = $1 AND status = 'pending'
                ",
            )
            .bind(order_no)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err(&e))?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn mark_failed<'a>(&'a mut self, order_no: &'a str, reason: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE orders
                SET status = 'failed', fail_reason = $2, canceled_at = NOW()
                WHERE order_no = $1 AND status = 'pending'
                ",
            )
            .bind(order_no)
            .bind(reason)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err(&e))?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>> {
        Box::pin(async move { self.tx.commit().await.map_err(|e| db_err(&e)) })
    }
}
