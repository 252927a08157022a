// src/db/postgres.rs

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    common::error::AppError,
    db::{
        count_repo::{DETAIL_COLUMNS, SESSION_COLUMNS},
        ledger_repo::STOCK_COLUMNS,
        movement_repo::MOVEMENT_COLUMNS,
        store::{Store, StoreTx},
    },
    models::{
        counting::{CountDetail, CountSession, CountSessionFilter},
        movement::Movement,
        stock::{StockKey, StockRecord, StockSummary},
    },
};

/// Applies the embedded schema in `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!().run(pool).await
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Open Postgres transaction. Rolled back by sqlx on drop.
pub struct PgTx {
    pub(crate) tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, AppError> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }

    async fn stock_by_location(&self, warehouse: &str, location_id: i64) -> Result<Vec<StockRecord>, AppError> {
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
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn stock_by_item(&self, warehouse: &str, item_code: &str) -> Result<Vec<StockRecord>, AppError> {
        let sql = format!(
            r#"
            SELECT {STOCK_COLUMNS}
              FROM stock_location
             WHERE whs_code = $1 AND item_code = $2 AND qty > 0
             ORDER BY location_id, lot_no NULLS FIRST
            "#
        );

        let rows = sqlx::query_as::<_, StockRecord>(&sql)
            .bind(warehouse)
            .bind(item_code)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn stock_summary(&self, warehouse: &str, item_code: &str) -> Result<Option<StockSummary>, AppError> {
        let summary = sqlx::query_as::<_, StockSummary>(
            r#"
            SELECT whs_code AS warehouse,
                   item_code,
                   SUM(qty) AS total_quantity,
                   COUNT(DISTINCT location_id) AS location_count
              FROM stock_location
             WHERE whs_code = $1 AND item_code = $2 AND qty > 0
             GROUP BY whs_code, item_code
            "#,
        )
        .bind(warehouse)
        .bind(item_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(summary)
    }

    async fn stock_record(&self, key: &StockKey) -> Result<Option<StockRecord>, AppError> {
        let sql = format!(
            r#"
            SELECT {STOCK_COLUMNS}
              FROM stock_location
             WHERE whs_code = $1
               AND location_id = $2
               AND item_code = $3
               AND lot_no IS NOT DISTINCT FROM $4
            "#
        );

        let row = sqlx::query_as::<_, StockRecord>(&sql)
            .bind(&key.warehouse)
            .bind(key.location_id)
            .bind(&key.item_code)
            .bind(key.lot_no.as_deref())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn movements_by_idempotency_key(&self, key: &str) -> Result<Vec<Movement>, AppError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM movement WHERE idempotency_key = $1 ORDER BY id");

        let rows = sqlx::query_as::<_, Movement>(&sql)
            .bind(key)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn count_session(&self, id: i64) -> Result<Option<CountSession>, AppError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM count_session WHERE id = $1");

        let session = sqlx::query_as::<_, CountSession>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn count_session_details(&self, session_id: i64) -> Result<Vec<CountDetail>, AppError> {
        let sql = format!("SELECT {DETAIL_COLUMNS} FROM count_detail WHERE session_id = $1 ORDER BY id");

        let rows = sqlx::query_as::<_, CountDetail>(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_count_sessions(&self, filter: &CountSessionFilter) -> Result<Vec<CountSession>, AppError> {
        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS}
              FROM count_session
             WHERE ($1::text IS NULL OR whs_code = $1)
               AND ($2::count_status IS NULL OR status = $2)
             ORDER BY created_at DESC, id DESC
             LIMIT $3
            "#
        );

        let rows = sqlx::query_as::<_, CountSession>(&sql)
            .bind(filter.warehouse.as_deref())
            .bind(filter.status)
            .bind(filter.effective_limit())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
