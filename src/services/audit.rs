// src/services/audit.rs

use std::sync::Arc;

use serde_json::Value;

use crate::{
    db::AuditSink,
    models::{audit::NewAuditEntry, operations::{Actor, OperationKind}},
};

/// Reports completed operations to the audit sink.
///
/// Runs after commit. A failed write is logged and swallowed: the operation
/// already happened and its result stands.
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn record(&self, actor: &Actor, operation: OperationKind, payload: Value) {
        let entry = NewAuditEntry {
            user_name: actor.username.clone(),
            action: operation.as_str().to_string(),
            payload,
        };

        if let Err(e) = self.sink.record(entry).await {
            tracing::warn!(%operation, user = %actor.username, "Audit write failed: {}", e);
        }
    }
}
