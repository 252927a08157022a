#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use wms_engine::{
    db::{MemoryAuditSink, MemoryStore},
    models::{
        counting::ReconciliationPolicy,
        movement::{DocumentType, ErpDocument},
        operations::{Actor, PutawayLine, PutawayRequest},
        stock::StockKey,
    },
    services::{
        Auditor, CountingService, ErpSync, MovementService, StockService, SyncError, SyncRequest,
    },
};

/// ERP double: answers from a script, then succeeds with increasing doc
/// entries. Every call is recorded.
#[derive(Default)]
pub struct ScriptedErp {
    script: Mutex<VecDeque<Result<ErpDocument, SyncError>>>,
    calls: Mutex<Vec<(SyncRequest, String)>>,
}

impl ScriptedErp {
    pub fn fail_next(&self, error: SyncError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<(SyncRequest, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErpSync for ScriptedErp {
    async fn call(&self, request: &SyncRequest, idempotency_key: &str) -> Result<ErpDocument, SyncError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((request.clone(), idempotency_key.to_string()));
        let next_entry = 1000 + calls.len() as i64;
        drop(calls);

        match self.script.lock().unwrap().pop_front() {
            Some(scripted) => scripted,
            None => Ok(ErpDocument { doc_type: request.document_type(), doc_entry: next_entry }),
        }
    }
}

pub fn connection_error() -> SyncError {
    SyncError::Connection { attempts: 3, message: "connection refused".into() }
}

pub struct Harness {
    pub store: MemoryStore,
    pub erp: Arc<ScriptedErp>,
    pub audit: MemoryAuditSink,
    pub movements: MovementService<MemoryStore>,
    pub counting: CountingService<MemoryStore>,
    pub stock: StockService<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(ReconciliationPolicy::default(), MemoryAuditSink::new())
    }

    pub fn with_policy(policy: ReconciliationPolicy) -> Self {
        Self::build(policy, MemoryAuditSink::new())
    }

    pub fn with_audit(audit: MemoryAuditSink) -> Self {
        Self::build(ReconciliationPolicy::default(), audit)
    }

    fn build(policy: ReconciliationPolicy, audit: MemoryAuditSink) -> Self {
        let store = MemoryStore::new();
        let erp = Arc::new(ScriptedErp::default());
        let auditor = Auditor::new(Arc::new(audit.clone()));
        Self {
            movements: MovementService::new(store.clone(), erp.clone(), auditor.clone()),
            counting: CountingService::new(store.clone(), erp.clone(), auditor, policy),
            stock: StockService::new(store.clone()),
            store,
            erp,
            audit,
        }
    }

    /// Receives `qty` of `item` at `location` in WH1 without ERP sync.
    pub async fn seed(&self, location: i64, item: &str, lot: Option<&str>, qty: i64) {
        let request = PutawayRequest {
            warehouse: "WH1".into(),
            lines: vec![PutawayLine {
                item: item.into(),
                lot: lot.map(str::to_owned),
                qty: Decimal::from(qty),
                to_location: location,
            }],
            sync_erp: false,
            idempotency_key: None,
        };
        self.movements.putaway(request, &actor()).await.expect("seed putaway");
    }

    pub async fn qty(&self, warehouse: &str, location: i64, item: &str, lot: Option<&str>) -> Decimal {
        self.stock
            .quantity(&StockKey::new(warehouse, location, item, lot.map(str::to_owned)))
            .await
            .expect("ledger read")
    }
}

pub fn actor() -> Actor {
    Actor::new("ana.souza").with_role("warehouse_operator")
}

pub fn dec(value: &str) -> Decimal {
    value.parse().expect("decimal literal")
}

pub fn document(doc_type: DocumentType, doc_entry: i64) -> ErpDocument {
    ErpDocument { doc_type, doc_entry }
}
