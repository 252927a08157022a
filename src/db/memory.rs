// src/db/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    common::error::AppError,
    db::{
        audit_repo::AuditSink,
        count_repo::CountRepository,
        idempotency_repo::{Claim, IdempotencyRepository},
        ledger_repo::LedgerRepository,
        movement_repo::MovementRepository,
        store::{Store, StoreTx},
    },
    models::{
        audit::{AuditEntry, NewAuditEntry},
        counting::{CountDetail, CountSession, CountSessionFilter, CountStatus, NewCountDetail},
        movement::{ErpDocument, Movement, NewMovement},
        operations::{OperationKind, max_quantity},
        stock::{Decrement, StockKey, StockRecord, StockSummary},
    },
};

// =============================================================================
//  STATE
// =============================================================================

#[derive(Debug, Clone, Default)]
struct MemoryState {
    stock: BTreeMap<StockKey, StockRecord>,
    movements: Vec<Movement>,
    sessions: BTreeMap<i64, CountSession>,
    details: BTreeMap<i64, CountDetail>,
    // None = claimed by an uncommitted transaction.
    idempotency: HashMap<(OperationKind, String), Option<Value>>,
    next_movement_id: i64,
    next_session_id: i64,
    next_detail_id: i64,
}

impl MemoryState {
    fn positive_rows<'a>(&'a self, filter: impl Fn(&StockKey) -> bool + 'a) -> impl Iterator<Item = &'a StockRecord> + 'a {
        self.stock
            .iter()
            .filter(move |(key, record)| filter(key) && record.quantity > Decimal::ZERO)
            .map(|(_, record)| record)
    }

    fn upsert(&mut self, key: &StockKey, apply: impl FnOnce(Decimal) -> Decimal) -> StockRecord {
        let record = self.stock.entry(key.clone()).or_insert_with(|| StockRecord {
            warehouse: key.warehouse.clone(),
            location_id: key.location_id,
            item_code: key.item_code.clone(),
            lot_no: key.lot_no.clone(),
            quantity: Decimal::ZERO,
            last_updated: Utc::now(),
        });
        record.quantity = apply(record.quantity);
        record.last_updated = Utc::now();
        record.clone()
    }
}

// =============================================================================
//  STORE
// =============================================================================

/// In-process store with the same contract as [`PgStore`](crate::db::PgStore).
///
/// A transaction takes the whole state behind one async mutex and works on a
/// copy; `commit` publishes the copy, anything else discards it. Transactions
/// are therefore fully serialized.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(MemoryTx { guard, work })
    }

    async fn stock_by_location(&self, warehouse: &str, location_id: i64) -> Result<Vec<StockRecord>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .positive_rows(|k| k.warehouse == warehouse && k.location_id == location_id)
            .cloned()
            .collect())
    }

    async fn stock_by_item(&self, warehouse: &str, item_code: &str) -> Result<Vec<StockRecord>, AppError> {
        let state = self.state.lock().await;
        let mut rows: Vec<StockRecord> = state
            .positive_rows(|k| k.warehouse == warehouse && k.item_code == item_code)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.location_id, &a.lot_no).cmp(&(b.location_id, &b.lot_no)));
        Ok(rows)
    }

    async fn stock_summary(&self, warehouse: &str, item_code: &str) -> Result<Option<StockSummary>, AppError> {
        let state = self.state.lock().await;
        let rows: Vec<&StockRecord> = state
            .positive_rows(|k| k.warehouse == warehouse && k.item_code == item_code)
            .collect();
        if rows.is_empty() {
            return Ok(None);
        }

        let mut locations: Vec<i64> = rows.iter().map(|r| r.location_id).collect();
        locations.sort_unstable();
        locations.dedup();

        Ok(Some(StockSummary {
            warehouse: warehouse.to_string(),
            item_code: item_code.to_string(),
            total_quantity: rows.iter().map(|r| r.quantity).sum(),
            location_count: locations.len() as i64,
        }))
    }

    async fn stock_record(&self, key: &StockKey) -> Result<Option<StockRecord>, AppError> {
        Ok(self.state.lock().await.stock.get(key).cloned())
    }

    async fn movements_by_idempotency_key(&self, key: &str) -> Result<Vec<Movement>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.idempotency_key == key)
            .cloned()
            .collect())
    }

    async fn count_session(&self, id: i64) -> Result<Option<CountSession>, AppError> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn count_session_details(&self, session_id: i64) -> Result<Vec<CountDetail>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .details
            .values()
            .filter(|d| d.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_count_sessions(&self, filter: &CountSessionFilter) -> Result<Vec<CountSession>, AppError> {
        let state = self.state.lock().await;
        let mut sessions: Vec<CountSession> = state
            .sessions
            .values()
            .filter(|s| filter.warehouse.as_deref().is_none_or(|w| s.warehouse == w))
            .filter(|s| filter.status.is_none_or(|status| s.status == status))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        sessions.truncate(filter.effective_limit() as usize);
        Ok(sessions)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self) -> Result<(), AppError> {
        let MemoryTx { mut guard, work } = self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self) -> Result<(), AppError> {
        Ok(())
    }
}

// =============================================================================
//  REPOSITORIES
// =============================================================================

#[async_trait]
impl LedgerRepository for MemoryTx {
    async fn decrement(&mut self, key: &StockKey, qty: Decimal) -> Result<Decrement, AppError> {
        let enough = self.work.stock.get(key).is_some_and(|r| r.quantity >= qty);
        if !enough {
            return Ok(Decrement::Insufficient);
        }
        Ok(Decrement::Applied(self.work.upsert(key, |q| q - qty)))
    }

    async fn increment(&mut self, key: &StockKey, qty: Decimal) -> Result<StockRecord, AppError> {
        // Same ceiling as the NUMERIC(15, 3) column.
        let current = self.work.stock.get(key).map_or(Decimal::ZERO, |r| r.quantity);
        if current + qty > max_quantity() {
            return Err(AppError::StorageError(format!("numeric field overflow on {key:?}")));
        }
        Ok(self.work.upsert(key, |q| q + qty))
    }

    async fn overwrite_quantity(&mut self, key: &StockKey, qty: Decimal) -> Result<StockRecord, AppError> {
        Ok(self.work.upsert(key, |_| qty))
    }

    async fn snapshot_location(&mut self, warehouse: &str, location_id: i64) -> Result<Vec<StockRecord>, AppError> {
        Ok(self
            .work
            .positive_rows(|k| k.warehouse == warehouse && k.location_id == location_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MovementRepository for MemoryTx {
    async fn record_movement(&mut self, movement: &NewMovement) -> Result<i64, AppError> {
        self.work.next_movement_id += 1;
        let id = self.work.next_movement_id;
        self.work.movements.push(Movement::from_new(id, movement, Utc::now()));
        Ok(id)
    }

    async fn link_documents(&mut self, movement_ids: &[i64], document: &ErpDocument) -> Result<u64, AppError> {
        let mut linked = 0;
        for movement in self.work.movements.iter_mut().filter(|m| movement_ids.contains(&m.id)) {
            movement.erp_doc_type = Some(document.doc_type);
            movement.erp_doc_entry = Some(document.doc_entry);
            linked += 1;
        }
        Ok(linked)
    }
}

#[async_trait]
impl CountRepository for MemoryTx {
    async fn create_count_session(&mut self, warehouse: &str, created_by: &str) -> Result<CountSession, AppError> {
        self.work.next_session_id += 1;
        let session = CountSession {
            id: self.work.next_session_id,
            warehouse: warehouse.to_string(),
            status: CountStatus::Open,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            closed_at: None,
        };
        self.work.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn insert_count_detail(&mut self, session_id: i64, detail: &NewCountDetail) -> Result<CountDetail, AppError> {
        self.work.next_detail_id += 1;
        let row = CountDetail {
            id: self.work.next_detail_id,
            session_id,
            location_id: detail.location_id,
            item_code: detail.item_code.clone(),
            lot_no: detail.lot_no.clone(),
            expected_qty: detail.expected_qty,
            counted_qty: None,
            adjusted: false,
        };
        self.work.details.insert(row.id, row.clone());
        Ok(row)
    }

    async fn lock_count_session(&mut self, session_id: i64) -> Result<Option<CountSession>, AppError> {
        Ok(self.work.sessions.get(&session_id).cloned())
    }

    async fn count_details(&mut self, session_id: i64) -> Result<Vec<CountDetail>, AppError> {
        Ok(self
            .work
            .details
            .values()
            .filter(|d| d.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn set_counted_qty(&mut self, session_id: i64, detail_id: i64, counted: Decimal) -> Result<bool, AppError> {
        match self.work.details.get_mut(&detail_id) {
            Some(detail) if detail.session_id == session_id => {
                detail.counted_qty = Some(counted);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_adjusted(&mut self, detail_id: i64) -> Result<(), AppError> {
        if let Some(detail) = self.work.details.get_mut(&detail_id) {
            detail.adjusted = true;
        }
        Ok(())
    }

    async fn close_count_session(&mut self, session_id: i64, closed_at: DateTime<Utc>) -> Result<bool, AppError> {
        match self.work.sessions.get_mut(&session_id) {
            Some(session) if session.is_open() => {
                session.status = CountStatus::Closed;
                session.closed_at = Some(closed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl IdempotencyRepository for MemoryTx {
    async fn claim(&mut self, operation: OperationKind, key: &str) -> Result<Claim, AppError> {
        let slot = (operation, key.to_string());
        match self.work.idempotency.get(&slot) {
            Some(Some(result)) => Ok(Claim::Completed(result.clone())),
            Some(None) => Err(AppError::StorageError(format!(
                "idempotency key {key} for {operation} exists without a stored result"
            ))),
            None => {
                self.work.idempotency.insert(slot, None);
                Ok(Claim::Fresh)
            }
        }
    }

    async fn complete(&mut self, operation: OperationKind, key: &str, result: &Value) -> Result<(), AppError> {
        self.work
            .idempotency
            .insert((operation, key.to_string()), Some(result.clone()));
        Ok(())
    }
}

// =============================================================================
//  AUDIT
// =============================================================================

/// Collects audit entries in memory. `failing()` builds one that rejects
/// every write.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<std::sync::Mutex<Vec<AuditEntry>>>,
    fail: bool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: NewAuditEntry) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::StorageError("audit log unavailable".to_string()));
        }

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = entries.len() as i64 + 1;
        entries.push(AuditEntry {
            id,
            ts: Utc::now(),
            user_name: entry.user_name,
            action: entry.action,
            payload: Some(entry.payload),
        });
        Ok(())
    }
}
