// src/db/ledger_repo.rs

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{
    common::error::AppError,
    db::postgres::PgTx,
    models::stock::{Decrement, StockKey, StockRecord},
};

pub(crate) const STOCK_COLUMNS: &str =
    "whs_code AS warehouse, location_id, item_code, lot_no, qty AS quantity, last_updated";

/// On-hand quantities per (warehouse, location, item, lot).
///
/// Every write is a single atomic statement against the row. There is no
/// read-then-write anywhere in here.
#[async_trait]
pub trait LedgerRepository: Send {
    /// Subtracts `qty` only if the row holds at least that much.
    async fn decrement(&mut self, key: &StockKey, qty: Decimal) -> Result<Decrement, AppError>;

    /// Adds `qty`, creating the row from zero if it does not exist.
    async fn increment(&mut self, key: &StockKey, qty: Decimal) -> Result<StockRecord, AppError>;

    /// Sets an absolute quantity. Count reconciliation only.
    async fn overwrite_quantity(&mut self, key: &StockKey, qty: Decimal) -> Result<StockRecord, AppError>;

    /// Rows with quantity > 0 at one location.
    async fn snapshot_location(&mut self, warehouse: &str, location_id: i64) -> Result<Vec<StockRecord>, AppError>;
}

#[async_trait]
impl LedgerRepository for PgTx {
    async fn decrement(&mut self, key: &StockKey, qty: Decimal) -> Result<Decrement, AppError> {
        let sql = format!(
            r#"
            UPDATE stock_location
               SET qty = qty - $5, last_updated = NOW()
             WHERE whs_code = $1
               AND location_id = $2
               AND item_code = $3
               AND lot_no IS NOT DISTINCT FROM $4
               AND qty >= $5
            RETURNING {STOCK_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, StockRecord>(&sql)
            .bind(&key.warehouse)
            .bind(key.location_id)
            .bind(&key.item_code)
            .bind(key.lot_no.as_deref())
            .bind(qty)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(match row {
            Some(record) => Decrement::Applied(record),
            None => Decrement::Insufficient,
        })
    }

    async fn increment(&mut self, key: &StockKey, qty: Decimal) -> Result<StockRecord, AppError> {
        let sql = format!(
            r#"
            INSERT INTO stock_location (whs_code, location_id, item_code, lot_no, qty)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (whs_code, location_id, item_code, lot_no)
            DO UPDATE SET
                qty = stock_location.qty + EXCLUDED.qty,
                last_updated = NOW()
            RETURNING {STOCK_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, StockRecord>(&sql)
            .bind(&key.warehouse)
            .bind(key.location_id)
            .bind(&key.item_code)
            .bind(key.lot_no.as_deref())
            .bind(qty)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(record)
    }

    async fn overwrite_quantity(&mut self, key: &StockKey, qty: Decimal) -> Result<StockRecord, AppError> {
        let sql = format!(
            r#"
            INSERT INTO stock_location (whs_code, location_id, item_code, lot_no, qty)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (whs_code, location_id, item_code, lot_no)
            DO UPDATE SET
                qty = EXCLUDED.qty,
                last_updated = NOW()
            RETURNING {STOCK_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, StockRecord>(&sql)
            .bind(&key.warehouse)
            .bind(key.location_id)
            .bind(&key.item_code)
            .bind(key.lot_no.as_deref())
            .bind(qty)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(record)
    }

    async fn snapshot_location(&mut self, warehouse: &str, location_id: i64) -> Result<Vec<StockRecord>, AppError> {
        let sql = format!(
            r#"
            SELECT {STOCK_COLUMNS}
              FROM stock_location
             WHERE whs_code = $1 AND location_id = $2 AND qty > 0
             ORDER BY item_code, lot_no NULLS FIRST
            "#
        );

        let rows = sqlx::query_as::<_, StockRecord>(&sql)
            .bind(warehouse)
            .bind(location_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows)
    }
}
