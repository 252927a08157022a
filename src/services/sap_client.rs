// src/services/sap_client.rs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::movement::{DocumentType, ErpDocument};

// =============================================================================
//  ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Every attempt failed at the transport level (refused, timed out,
    /// 5xx, garbage body).
    #[error("SAP DI unreachable after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },

    /// The bridge answered and said no. Never retried.
    #[error("SAP DI rejected the document: [{code}] {message}")]
    Upstream { code: String, message: String },
}

impl SyncError {
    pub fn code(&self) -> &str {
        match self {
            SyncError::Connection { .. } => "CONNECTION_ERROR",
            SyncError::Upstream { code, .. } => code,
        }
    }
}

// =============================================================================
//  PAYLOADS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLine {
    pub item: String,
    pub qty: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPayload {
    pub whs: String,
    pub reference: String,
    pub lines: Vec<DocumentLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub from_whs: String,
    pub to_whs: String,
    pub reference: String,
    pub lines: Vec<DocumentLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncRequest {
    GoodReceipt(DocumentPayload),
    GoodIssue(DocumentPayload),
    InventoryTransfer(TransferPayload),
}

impl SyncRequest {
    pub fn endpoint(&self) -> &'static str {
        match self {
            SyncRequest::GoodReceipt(_) => "/Inventory/GoodReceipt",
            SyncRequest::GoodIssue(_) => "/Inventory/GoodIssue",
            SyncRequest::InventoryTransfer(_) => "/Inventory/Transfer",
        }
    }

    pub fn document_type(&self) -> DocumentType {
        match self {
            SyncRequest::GoodReceipt(_) => DocumentType::GoodReceipt,
            SyncRequest::GoodIssue(_) => DocumentType::GoodIssue,
            SyncRequest::InventoryTransfer(_) => DocumentType::InventoryTransfer,
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            SyncRequest::GoodReceipt(p) | SyncRequest::GoodIssue(p) => &p.reference,
            SyncRequest::InventoryTransfer(p) => &p.reference,
        }
    }

    fn body(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            SyncRequest::GoodReceipt(p) | SyncRequest::GoodIssue(p) => serde_json::to_value(p),
            SyncRequest::InventoryTransfer(p) => serde_json::to_value(p),
        }
    }
}

// --- Bridge response envelope: {ok, data?, error?} ---
#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    data: Option<DocumentData>,
    error: Option<RejectionBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentData {
    doc_entry: i64,
    #[allow(dead_code)]
    doc_num: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RejectionBody {
    code: Option<String>,
    message: Option<String>,
}

// =============================================================================
//  CLIENT
// =============================================================================

/// Outbound seam to the system of record.
#[async_trait]
pub trait ErpSync: Send + Sync {
    async fn call(&self, request: &SyncRequest, idempotency_key: &str) -> Result<ErpDocument, SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Pause after failed attempt number `attempt` (1-based). Linear.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay * attempt
    }
}

/// Outcome of a single attempt, before the retry loop decides.
enum Attempt {
    Done(ErpDocument),
    Rejected(SyncError),
    Transient(String),
}

#[derive(Clone)]
pub struct SapClient {
    http: reqwest::Client,
    base_url: String,
    policy: RetryPolicy,
}

impl SapClient {
    pub fn new(base_url: impl Into<String>, policy: RetryPolicy) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Single GET on `/health`, no retries.
    pub async fn health_check(&self) -> Result<(), SyncError> {
        let request = self.http.get(self.url("/health")).send();
        match tokio::time::timeout(self.policy.attempt_timeout, request).await {
            Err(_) => Err(SyncError::Connection {
                attempts: 1,
                message: "health check timed out".to_string(),
            }),
            Ok(Err(e)) => Err(SyncError::Connection { attempts: 1, message: e.to_string() }),
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(SyncError::Upstream {
                code: format!("HTTP_{}", response.status().as_u16()),
                message: "health check failed".to_string(),
            }),
        }
    }

    async fn attempt(&self, request: &SyncRequest, body: &serde_json::Value, key: &str) -> Attempt {
        let send = self
            .http
            .post(self.url(request.endpoint()))
            .header("Idempotency-Key", key)
            .json(body)
            .send();

        let response = match tokio::time::timeout(self.policy.attempt_timeout, send).await {
            Err(_) => return Attempt::Transient(format!("timed out after {:?}", self.policy.attempt_timeout)),
            Ok(Err(e)) => return Attempt::Transient(e.to_string()),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if is_transient_status(status) {
            return Attempt::Transient(format!("HTTP {}", status.as_u16()));
        }

        // The body read counts against the same per-attempt budget.
        let envelope = match tokio::time::timeout(self.policy.attempt_timeout, response.json::<Envelope>()).await {
            Err(_) => return Attempt::Transient("timed out reading response body".to_string()),
            Ok(Err(e)) if status.is_success() => return Attempt::Transient(format!("unreadable response: {e}")),
            Ok(Err(_)) => {
                return Attempt::Rejected(SyncError::Upstream {
                    code: format!("HTTP_{}", status.as_u16()),
                    message: format!("request rejected with status {}", status.as_u16()),
                });
            }
            Ok(Ok(envelope)) => envelope,
        };

        match envelope {
            Envelope { ok: true, data: Some(data), .. } if status.is_success() => Attempt::Done(ErpDocument {
                doc_type: request.document_type(),
                doc_entry: data.doc_entry,
            }),
            Envelope { ok: true, data: None, .. } if status.is_success() => {
                Attempt::Transient("success response without document data".to_string())
            }
            Envelope { error, .. } => {
                let (code, message) = match error {
                    Some(RejectionBody { code, message }) => (code, message),
                    None => (None, None),
                };
                Attempt::Rejected(SyncError::Upstream {
                    code: code.unwrap_or_else(|| format!("HTTP_{}", status.as_u16())),
                    message: message.unwrap_or_else(|| "document rejected".to_string()),
                })
            }
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl ErpSync for SapClient {
    #[tracing::instrument(skip(self, request), fields(endpoint = request.endpoint(), reference = request.reference()))]
    async fn call(&self, request: &SyncRequest, idempotency_key: &str) -> Result<ErpDocument, SyncError> {
        let body = request.body().map_err(|e| SyncError::Upstream {
            code: "INVALID_PAYLOAD".to_string(),
            message: e.to_string(),
        })?;

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(request, &body, idempotency_key).await {
                Attempt::Done(document) => {
                    tracing::info!(attempt, doc_entry = document.doc_entry, "SAP document created");
                    return Ok(document);
                }
                Attempt::Rejected(err) => {
                    tracing::warn!(attempt, code = err.code(), "SAP rejected document");
                    return Err(err);
                }
                Attempt::Transient(message) => {
                    tracing::warn!(attempt, max_attempts, %message, "SAP call failed");
                    last_error = message;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(SyncError::Connection { attempts: max_attempts, message: last_error })
    }
}
