// src/common/error.rs

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::operations::OperationKind;
use crate::services::sap_client::SyncError;

// Business outcomes (insufficient stock, closed session) are ordinary variants:
// callers branch on `code()`, nothing here is meant to panic.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Insufficient stock for item {item} at {warehouse}/{location_id}")]
    InsufficientStock {
        warehouse: String,
        location_id: i64,
        item: String,
        lot: Option<String>,
    },

    #[error("Count session {0} not found or not open")]
    InvalidSession(i64),

    #[error("ERP sync failed: {0}")]
    SyncFailed(#[from] SyncError),

    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    ResourceNotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl AppError {
    /// Stable taxonomy code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::InvalidSession(_) => "INVALID_SESSION",
            AppError::SyncFailed(_) => "SYNC_FAILED",
            AppError::ValidationError(_) | AppError::InvalidInput(_) => "VALIDATION_ERROR",
            AppError::ResourceNotFound(_) => "NOT_FOUND",
            AppError::DatabaseError(_)
            | AppError::SerializationError(_)
            | AppError::StorageError(_) => "STORAGE_ERROR",
        }
    }

    /// Business-rule rejections, as opposed to system faults.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            AppError::InsufficientStock { .. }
                | AppError::InvalidSession(_)
                | AppError::ValidationError(_)
                | AppError::InvalidInput(_)
        )
    }

    pub fn to_error_body(&self, operation: Option<OperationKind>) -> ErrorBody {
        let message = match self {
            // Every field error, not just the first one.
            AppError::ValidationError(errors) => {
                let mut details: Vec<String> = Vec::new();
                for (field, field_errors) in errors.field_errors() {
                    for e in field_errors {
                        match &e.message {
                            Some(m) => details.push(format!("{field}: {m}")),
                            None => details.push(format!("{field}: {}", e.code)),
                        }
                    }
                }
                if details.is_empty() {
                    self.to_string()
                } else {
                    details.sort();
                    details.join("; ")
                }
            }
            AppError::SyncFailed(sync) => format!("{} ({})", self, sync.code()),
            other => other.to_string(),
        };

        ErrorBody {
            code: self.code().to_string(),
            message,
            failure: operation.map(|op| op.failure_code().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    /// Operation-level code such as `PUTAWAY_FAILED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Uniform `{ok, data | error}` envelope for callers that want one shape for
/// success and failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> ApiResponse<T> {
    pub fn from_result(operation: OperationKind, result: Result<T, AppError>) -> Self {
        match result {
            Ok(data) => Self { ok: true, data: Some(data), error: None },
            Err(e) => Self { ok: false, data: None, error: Some(e.to_error_body(Some(operation))) },
        }
    }
}
