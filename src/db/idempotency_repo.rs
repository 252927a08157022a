// src/db/idempotency_repo.rs

use async_trait::async_trait;
use serde_json::Value;

use crate::{common::error::AppError, db::postgres::PgTx, models::operations::OperationKind};

/// Result of claiming `(operation, key)` inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// First time this key is seen; the claim lives and dies with the
    /// current transaction.
    Fresh,
    /// Already completed; the stored result of that completion.
    Completed(Value),
}

#[async_trait]
pub trait IdempotencyRepository: Send {
    async fn claim(&mut self, operation: OperationKind, key: &str) -> Result<Claim, AppError>;

    async fn complete(&mut self, operation: OperationKind, key: &str, result: &Value) -> Result<(), AppError>;
}

#[async_trait]
impl IdempotencyRepository for PgTx {
    async fn claim(&mut self, operation: OperationKind, key: &str) -> Result<Claim, AppError> {
        // Blocks on the primary key while another transaction holds the same
        // claim; resumes once that one commits or rolls back.
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO idempotency_key (operation, key)
            VALUES ($1, $2)
            ON CONFLICT (operation, key) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(operation.as_str())
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await?;

        if inserted.is_some() {
            return Ok(Claim::Fresh);
        }

        let stored: Option<Option<Value>> =
            sqlx::query_scalar("SELECT result FROM idempotency_key WHERE operation = $1 AND key = $2")
                .bind(operation.as_str())
                .bind(key)
                .fetch_optional(&mut *self.tx)
                .await?;

        match stored.flatten() {
            Some(result) => Ok(Claim::Completed(result)),
            None => Err(AppError::StorageError(format!(
                "idempotency key {key} for {operation} exists without a stored result"
            ))),
        }
    }

    async fn complete(&mut self, operation: OperationKind, key: &str, result: &Value) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE idempotency_key
               SET result = $3, completed_at = NOW()
             WHERE operation = $1 AND key = $2
            "#,
        )
        .bind(operation.as_str())
        .bind(key)
        .bind(result)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}
