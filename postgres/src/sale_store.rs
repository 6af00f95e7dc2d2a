//! Sale catalog queries.

use crate::db_err;
use flashsale_core::store::StoreFuture;
use flashsale_core::{Sale, SaleProduct, SaleStatus, SaleStore, StoreError};
use sqlx::{PgPool, Row};

const SALE_COLUMNS: &str = "id, name, start_at, end_at, status, created_at, updated_at";

/// Sale catalog backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresSaleStore {
    pool: PgPool,
}

impl PostgresSaleStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_sale(row: &sqlx::postgres::PgRow) -> Result<Sale, StoreError> {
    let status_str: String = row.get("status");
    let status = SaleStatus::parse(&status_str)
        .ok_or_else(|| StoreError::Database(format!("invalid sale status '{status_str}'")))?;

    Ok(Sale {
        id: row.get("id"),
        name: row.get("name"),
        start_at: row.get("start_at"),
        end_at: row.get("end_at"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_sale_product(row: &sqlx::postgres::PgRow) -> SaleProduct {
    SaleProduct {
        id: row.get("id"),
        sale_id: row.get("sale_id"),
        product_id: row.get("product_id"),
        sale_stock: row.get("sale_stock"),
        sale_price: row.get("sale_price"),
    }
}

impl SaleStore for PostgresSaleStore {
    fn active_sale(&self) -> StoreFuture<'_, Option<Sale>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                r"
                SELECT {SALE_COLUMNS}
                FROM flash_sales
                WHERE status IN ('scheduled', 'active')
                  AND start_at <= NOW()
                  AND end_at > NOW()
                ORDER BY start_at
                LIMIT 1
                "
            ))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

            row.as_ref().map(row_to_sale).transpose()
        })
    }

    fn sale_by_id(&self, sale_id: i64) -> StoreFuture<'_, Option<Sale>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {SALE_COLUMNS} FROM flash_sales WHERE id = $1"
            ))
            .bind(sale_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

            row.as_ref().map(row_to_sale).transpose()
        })
    }

    fn sale_products(&self, sale_id: i64) -> StoreFuture<'_, Vec<SaleProduct>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, sale_id, product_id, sale_stock, sale_price
                FROM flash_sale_products
                WHERE sale_id = $1
                ORDER BY id
                ",
            )
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

            Ok(rows.iter().map(row_to_sale_product).collect())
        })
    }

    fn sale_product<'a>(
        &'a self,
        sale_id: i64,
        product_id: &'a str,
    ) -> StoreFuture<'a, Option<SaleProduct>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, sale_id, product_id, sale_stock, sale_price
                FROM flash_sale_products
                WHERE sale_id = $1 AND product_id = $2
                ",
            )
            .bind(sale_id)
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

            Ok(row.as_ref().map(row_to_sale_product))
        })
    }

    fn update_sale_status(
        &self,
        sale_id: i64,
        from: SaleStatus,
        to: SaleStatus,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE flash_sales
                SET status = $3, updated_at = NOW()
                WHERE id = $1 AND status = $2
                ",
            )
            .bind(sale_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(&e))?;

            let changed = result.rows_affected() > 0;
            if changed {
                tracing::info!(
                    sale_id,
                    from = from.as_str(),
                    to = to.as_str(),
                    "sale status advanced"
                );
            }
            Ok(changed)
        })
    }
}
