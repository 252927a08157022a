// src/db/movement_repo.rs

use async_trait::async_trait;

use crate::{
    common::error::AppError,
    db::postgres::PgTx,
    models::movement::{ErpDocument, NewMovement},
};

pub(crate) const MOVEMENT_COLUMNS: &str = "id, movement_type, whs_code_from, location_id_from, \
     whs_code_to, location_id_to, item_code, lot_no, qty AS quantity, reference, \
     erp_doc_type, erp_doc_entry, idempotency_key, created_by, created_at";

/// Append-only movement log.
#[async_trait]
pub trait MovementRepository: Send {
    async fn record_movement(&mut self, movement: &NewMovement) -> Result<i64, AppError>;

    /// Attaches the confirmed ERP document to movements written by the
    /// current operation. The only update the log ever sees.
    async fn link_documents(&mut self, movement_ids: &[i64], document: &ErpDocument) -> Result<u64, AppError>;
}

#[async_trait]
impl MovementRepository for PgTx {
    async fn record_movement(&mut self, movement: &NewMovement) -> Result<i64, AppError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO movement (
                movement_type, whs_code_from, location_id_from, whs_code_to, location_id_to,
                item_code, lot_no, qty, reference, idempotency_key, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(movement.movement_type)
        .bind(movement.source.as_ref().map(|e| e.warehouse.as_str()))
        .bind(movement.source.as_ref().map(|e| e.location_id))
        .bind(movement.destination.as_ref().map(|e| e.warehouse.as_str()))
        .bind(movement.destination.as_ref().map(|e| e.location_id))
        .bind(&movement.item_code)
        .bind(movement.lot_no.as_deref())
        .bind(movement.quantity)
        .bind(&movement.reference)
        .bind(&movement.idempotency_key)
        .bind(&movement.created_by)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn link_documents(&mut self, movement_ids: &[i64], document: &ErpDocument) -> Result<u64, AppError> {
        if movement_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE movement
               SET erp_doc_type = $1, erp_doc_entry = $2
             WHERE id = ANY($3)
            "#,
        )
        .bind(document.doc_type)
        .bind(document.doc_entry)
        .bind(movement_ids)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }
}
