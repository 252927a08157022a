// src/db/count_repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{
    common::error::AppError,
    db::postgres::PgTx,
    models::counting::{CountDetail, CountSession, NewCountDetail},
};

pub(crate) const SESSION_COLUMNS: &str = "id, whs_code AS warehouse, status, created_by, created_at, closed_at";

pub(crate) const DETAIL_COLUMNS: &str =
    "id, session_id, location_id, item_code, lot_no, expected_qty, counted_qty, adjusted";

#[async_trait]
pub trait CountRepository: Send {
    async fn create_count_session(&mut self, warehouse: &str, created_by: &str) -> Result<CountSession, AppError>;

    async fn insert_count_detail(&mut self, session_id: i64, detail: &NewCountDetail) -> Result<CountDetail, AppError>;

    /// Reads the session and holds it until the transaction ends.
    async fn lock_count_session(&mut self, session_id: i64) -> Result<Option<CountSession>, AppError>;

    async fn count_details(&mut self, session_id: i64) -> Result<Vec<CountDetail>, AppError>;

    /// `false` when the detail does not belong to the session.
    async fn set_counted_qty(&mut self, session_id: i64, detail_id: i64, counted: Decimal) -> Result<bool, AppError>;

    async fn mark_adjusted(&mut self, detail_id: i64) -> Result<(), AppError>;

    /// OPEN -> CLOSED. `false` if the session was not OPEN.
    async fn close_count_session(&mut self, session_id: i64, closed_at: DateTime<Utc>) -> Result<bool, AppError>;
}

#[async_trait]
impl CountRepository for PgTx {
    async fn create_count_session(&mut self, warehouse: &str, created_by: &str) -> Result<CountSession, AppError> {
        let sql = format!(
            r#"
            INSERT INTO count_session (whs_code, status, created_by)
            VALUES ($1, 'OPEN', $2)
            RETURNING {SESSION_COLUMNS}
            "#
        );

        let session = sqlx::query_as::<_, CountSession>(&sql)
            .bind(warehouse)
            .bind(created_by)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(session)
    }

    async fn insert_count_detail(&mut self, session_id: i64, detail: &NewCountDetail) -> Result<CountDetail, AppError> {
        let sql = format!(
            r#"
            INSERT INTO count_detail (session_id, location_id, item_code, lot_no, expected_qty)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {DETAIL_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, CountDetail>(&sql)
            .bind(session_id)
            .bind(detail.location_id)
            .bind(&detail.item_code)
            .bind(detail.lot_no.as_deref())
            .bind(detail.expected_qty)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn lock_count_session(&mut self, session_id: i64) -> Result<Option<CountSession>, AppError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM count_session WHERE id = $1 FOR UPDATE");

        let session = sqlx::query_as::<_, CountSession>(&sql)
            .bind(session_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(session)
    }

    async fn count_details(&mut self, session_id: i64) -> Result<Vec<CountDetail>, AppError> {
        let sql = format!("SELECT {DETAIL_COLUMNS} FROM count_detail WHERE session_id = $1 ORDER BY id");

        let rows = sqlx::query_as::<_, CountDetail>(&sql)
            .bind(session_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows)
    }

    async fn set_counted_qty(&mut self, session_id: i64, detail_id: i64, counted: Decimal) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE count_detail SET counted_qty = $3 WHERE id = $2 AND session_id = $1")
            .bind(session_id)
            .bind(detail_id)
            .bind(counted)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_adjusted(&mut self, detail_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE count_detail SET adjusted = TRUE WHERE id = $1")
            .bind(detail_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn close_count_session(&mut self, session_id: i64, closed_at: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE count_session SET status = 'CLOSED', closed_at = $2 WHERE id = $1 AND status = 'OPEN'",
        )
        .bind(session_id)
        .bind(closed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
