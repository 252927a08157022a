// src/services/counting_service.rs

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use validator::Validate;

use crate::{
    common::error::AppError,
    db::{CountRepository, LedgerRepository, MovementRepository, Store},
    models::{
        counting::{
            CountDetail, CountSession, CountSessionDetails, CountSessionFilter, NewCountDetail,
            ReconciliationPolicy,
        },
        movement::{Endpoint, ErpDocument, MovementType, NewMovement},
        operations::{
            Actor, Adjustment, AdjustmentsApplied, ApplyCountRequest, CountsEntered,
            CreateCountSessionRequest, EnterCountsRequest, IdempotencyKey, OperationKind,
            SessionCreated,
        },
    },
    services::{
        audit::Auditor,
        idempotency::{Admission, OperationScope},
        movement_service::{sync_and_link, take_stock},
        sap_client::{DocumentLine, DocumentPayload, ErpSync, SyncRequest},
    },
};

/// Differences at or below this are treated as a match.
pub fn count_tolerance() -> Decimal {
    Decimal::new(1, 3)
}

/// Cycle count workflow: OPEN session -> counts entered -> adjustments
/// applied and session CLOSED.
#[derive(Clone)]
pub struct CountingService<S: Store> {
    store: S,
    erp: Arc<dyn ErpSync>,
    auditor: Auditor,
    policy: ReconciliationPolicy,
}

impl<S: Store> CountingService<S> {
    pub fn new(store: S, erp: Arc<dyn ErpSync>, auditor: Auditor, policy: ReconciliationPolicy) -> Self {
        Self { store, erp, auditor, policy }
    }

    pub fn policy(&self) -> ReconciliationPolicy {
        self.policy
    }

    // ---
    // Queries
    // ---

    pub async fn get_session(&self, session_id: i64) -> Result<CountSession, AppError> {
        self.store
            .count_session(session_id)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("Count session {session_id}")))
    }

    pub async fn session_details(&self, session_id: i64) -> Result<CountSessionDetails, AppError> {
        let session = self.get_session(session_id).await?;
        let details = self.store.count_session_details(session_id).await?;
        Ok(CountSessionDetails { session, details })
    }

    pub async fn list_sessions(&self, filter: &CountSessionFilter) -> Result<Vec<CountSession>, AppError> {
        self.store.list_count_sessions(filter).await
    }

    // ---
    // CREATE SESSION
    // ---

    #[tracing::instrument(skip(self, request, actor), fields(warehouse = %request.warehouse, user = %actor.username))]
    pub async fn create_session(
        &self,
        request: CreateCountSessionRequest,
        actor: &Actor,
    ) -> Result<SessionCreated, AppError> {
        actor.validate()?;
        request.validate()?;

        let key = IdempotencyKey::resolve(request.idempotency_key.as_deref());
        let mut scope = match OperationScope::open(&self.store, OperationKind::CreateCountSession, key).await? {
            Admission::Replay(result) => return Ok(result),
            Admission::Fresh(scope) => scope,
        };

        let key = scope.key().clone();
        let outcome = Self::create_session_in(scope.tx(), &request, &key, actor).await;
        let result = scope.finish(outcome).await?;

        tracing::info!(session_id = result.session_id, details = result.details_captured, "Count session opened");
        self.auditor
            .record(actor, OperationKind::CreateCountSession, json!({ "request": request, "result": result }))
            .await;
        Ok(result)
    }

    async fn create_session_in(
        tx: &mut S::Tx,
        request: &CreateCountSessionRequest,
        key: &IdempotencyKey,
        actor: &Actor,
    ) -> Result<SessionCreated, AppError> {
        let session = tx.create_count_session(&request.warehouse, &actor.username).await?;

        // Snapshot per location. Rows are read one location at a time, not as
        // one consistent cut of the whole ledger.
        let mut captured = 0;
        for location_id in &request.scope.locations {
            for record in tx.snapshot_location(&request.warehouse, *location_id).await? {
                let detail = NewCountDetail {
                    location_id: record.location_id,
                    item_code: record.item_code,
                    lot_no: record.lot_no,
                    expected_qty: record.quantity,
                };
                tx.insert_count_detail(session.id, &detail).await?;
                captured += 1;
            }
        }

        Ok(SessionCreated {
            session_id: session.id,
            details_captured: captured,
            idempotency_key: key.to_string(),
        })
    }

    // ---
    // ENTER COUNTS
    // ---

    #[tracing::instrument(skip(self, request, actor), fields(session_id = request.session_id, user = %actor.username))]
    pub async fn enter_counts(&self, request: EnterCountsRequest, actor: &Actor) -> Result<CountsEntered, AppError> {
        actor.validate()?;
        request.validate()?;

        let key = IdempotencyKey::resolve(request.idempotency_key.as_deref());
        let mut scope = match OperationScope::open(&self.store, OperationKind::EnterCounts, key).await? {
            Admission::Replay(result) => return Ok(result),
            Admission::Fresh(scope) => scope,
        };

        let key = scope.key().clone();
        let outcome = Self::enter_counts_in(scope.tx(), &request, &key).await;
        let result = scope.finish(outcome).await?;

        self.auditor
            .record(actor, OperationKind::EnterCounts, json!({ "request": request, "result": result }))
            .await;
        Ok(result)
    }

    async fn enter_counts_in(
        tx: &mut S::Tx,
        request: &EnterCountsRequest,
        key: &IdempotencyKey,
    ) -> Result<CountsEntered, AppError> {
        let session = tx.lock_count_session(request.session_id).await?;
        if !session.as_ref().is_some_and(CountSession::is_open) {
            return Err(AppError::InvalidSession(request.session_id));
        }

        for entry in &request.counts {
            if !tx.set_counted_qty(request.session_id, entry.detail_id, entry.counted_qty).await? {
                return Err(AppError::InvalidInput(format!(
                    "count detail {} does not belong to session {}",
                    entry.detail_id, request.session_id
                )));
            }
        }

        Ok(CountsEntered {
            counts_entered: request.counts.len(),
            idempotency_key: key.to_string(),
        })
    }

    // ---
    // APPLY ADJUSTMENTS
    // ---

    #[tracing::instrument(skip(self, request, actor), fields(session_id = request.session_id, user = %actor.username))]
    pub async fn apply_adjustments(
        &self,
        request: ApplyCountRequest,
        actor: &Actor,
    ) -> Result<AdjustmentsApplied, AppError> {
        actor.validate()?;
        request.validate()?;

        let key = IdempotencyKey::resolve(request.idempotency_key.as_deref());
        let mut scope = match OperationScope::open(&self.store, OperationKind::ApplyCountAdjustments, key).await? {
            Admission::Replay(result) => return Ok(result),
            Admission::Fresh(scope) => scope,
        };

        let key = scope.key().clone();
        let outcome = self.apply_in(scope.tx(), &request, &key, actor).await;
        let result = scope.finish(outcome).await?;

        tracing::info!(adjustments = result.adjustments_applied, "Count session closed");
        self.auditor
            .record(actor, OperationKind::ApplyCountAdjustments, json!({ "request": request, "result": result }))
            .await;
        Ok(result)
    }

    async fn apply_in(
        &self,
        tx: &mut S::Tx,
        request: &ApplyCountRequest,
        key: &IdempotencyKey,
        actor: &Actor,
    ) -> Result<AdjustmentsApplied, AppError> {
        // 1. Lock the session row for the rest of the transaction
        let session = match tx.lock_count_session(request.session_id).await? {
            Some(session) if session.is_open() => session,
            _ => return Err(AppError::InvalidSession(request.session_id)),
        };

        // 2. One adjustment movement per detail outside tolerance
        let reference = format!("COUNT-{}-{}", session.id, request.comment());
        let mut adjustments = Vec::new();

        for detail in tx.count_details(session.id).await? {
            let Some(counted) = detail.counted_qty else { continue };
            if detail.adjusted {
                continue;
            }
            let diff = counted - detail.expected_qty;
            if diff.abs() <= count_tolerance() {
                continue;
            }

            self.reconcile(tx, &session, &detail, counted, diff).await?;

            let endpoint = Endpoint::new(&session.warehouse, detail.location_id);
            let (movement_type, source, destination) = if diff > Decimal::ZERO {
                (MovementType::AdjustPos, None, Some(endpoint))
            } else {
                (MovementType::AdjustNeg, Some(endpoint), None)
            };

            let movement_id = tx
                .record_movement(&NewMovement {
                    movement_type,
                    source,
                    destination,
                    item_code: detail.item_code.clone(),
                    lot_no: detail.lot_no.clone(),
                    quantity: diff.abs(),
                    reference: reference.clone(),
                    idempotency_key: key.to_string(),
                    created_by: actor.username.clone(),
                })
                .await?;
            tx.mark_adjusted(detail.id).await?;

            adjustments.push(Adjustment::from_detail(&detail, movement_id, diff));
        }

        // 3. ERP documents: gains as one Good Receipt, losses as one Good Issue
        let mut erp_documents = Vec::new();
        if request.create_erp_adjustments {
            let gains: Vec<&Adjustment> = adjustments.iter().filter(|a| a.diff > Decimal::ZERO).collect();
            let losses: Vec<&Adjustment> = adjustments.iter().filter(|a| a.diff < Decimal::ZERO).collect();

            if let Some(document) = self
                .post_adjustments(tx, &session, &gains, key.derived("POS"), SyncRequest::GoodReceipt)
                .await?
            {
                erp_documents.push(document);
            }
            if let Some(document) = self
                .post_adjustments(tx, &session, &losses, key.derived("NEG"), SyncRequest::GoodIssue)
                .await?
            {
                erp_documents.push(document);
            }
        }

        // 4. OPEN -> CLOSED, same transaction
        if !tx.close_count_session(session.id, Utc::now()).await? {
            return Err(AppError::InvalidSession(session.id));
        }

        Ok(AdjustmentsApplied {
            adjustments_applied: adjustments.len(),
            adjustments,
            erp_documents,
            idempotency_key: key.to_string(),
        })
    }

    async fn reconcile(
        &self,
        tx: &mut S::Tx,
        session: &CountSession,
        detail: &CountDetail,
        counted: Decimal,
        diff: Decimal,
    ) -> Result<(), AppError> {
        let key = detail.stock_key(&session.warehouse);
        match self.policy {
            // Last writer wins: changes since the snapshot are discarded.
            ReconciliationPolicy::GroundTruth => {
                tx.overwrite_quantity(&key, counted).await?;
            }
            ReconciliationPolicy::DeltaAgainstLedger if diff > Decimal::ZERO => {
                tx.increment(&key, diff).await?;
            }
            ReconciliationPolicy::DeltaAgainstLedger => {
                take_stock(tx, &key, diff.abs()).await?;
            }
        }
        Ok(())
    }

    async fn post_adjustments(
        &self,
        tx: &mut S::Tx,
        session: &CountSession,
        adjustments: &[&Adjustment],
        sync_key: String,
        document: fn(DocumentPayload) -> SyncRequest,
    ) -> Result<Option<ErpDocument>, AppError> {
        if adjustments.is_empty() {
            return Ok(None);
        }

        let request = document(DocumentPayload {
            whs: session.warehouse.clone(),
            reference: format!("COUNT-ADJ-{}", session.id),
            lines: adjustments
                .iter()
                .map(|a| DocumentLine { item: a.item_code.clone(), qty: a.diff.abs(), lot: a.lot_no.clone() })
                .collect(),
        });
        let movement_ids: Vec<i64> = adjustments.iter().map(|a| a.movement_id).collect();

        let linked = sync_and_link(self.erp.as_ref(), tx, &request, &sync_key, &movement_ids).await?;
        Ok(Some(linked))
    }
}
