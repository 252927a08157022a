// src/db/audit_repo.rs

use async_trait::async_trait;
use sqlx::PgPool;

use crate::{
    common::error::AppError,
    models::audit::{AuditEntry, AuditFilter, NewAuditEntry},
};

/// Where completed actions are reported. Written after commit, outside the
/// operation's transaction.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: NewAuditEntry) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Newest first.
    pub async fn audit_trail(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AppError> {
        let rows = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, ts, user_name, action, payload
              FROM audit_log
             WHERE ($1::text IS NULL OR user_name = $1)
               AND ($2::text IS NULL OR action = $2)
             ORDER BY ts DESC, id DESC
             LIMIT $3
            "#,
        )
        .bind(filter.user_name.as_deref())
        .bind(filter.action.as_deref())
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AuditSink for PgAuditRepository {
    async fn record(&self, entry: NewAuditEntry) -> Result<(), AppError> {
        sqlx::query("INSERT INTO audit_log (user_name, action, payload) VALUES ($1, $2, $3)")
            .bind(&entry.user_name)
            .bind(&entry.action)
            .bind(&entry.payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
