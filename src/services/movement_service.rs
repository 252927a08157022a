// src/services/movement_service.rs

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use validator::Validate;

use crate::{
    common::error::AppError,
    db::{LedgerRepository, MovementRepository, Store},
    models::{
        movement::{Endpoint, ErpDocument, MovementType, NewMovement},
        operations::{
            Actor, IdempotencyKey, InternalMoveRequest, IssueRequest, MoveLine, MovementsCreated,
            OperationKind, PutawayRequest, WarehouseTransferRequest,
        },
        stock::{Decrement, StockKey, StockRecord},
    },
    services::{
        audit::Auditor,
        idempotency::{Admission, OperationScope},
        sap_client::{DocumentLine, DocumentPayload, ErpSync, SyncRequest, TransferPayload},
    },
};

/// Conditional decrement that turns "not enough" into `INSUFFICIENT_STOCK`.
pub(crate) async fn take_stock<T>(tx: &mut T, key: &StockKey, qty: Decimal) -> Result<StockRecord, AppError>
where
    T: LedgerRepository + ?Sized,
{
    match tx.decrement(key, qty).await? {
        Decrement::Applied(record) => Ok(record),
        Decrement::Insufficient => Err(AppError::InsufficientStock {
            warehouse: key.warehouse.clone(),
            location_id: key.location_id,
            item: key.item_code.clone(),
            lot: key.lot_no.clone(),
        }),
    }
}

/// Sends one document and links it to the movements of this operation.
pub(crate) async fn sync_and_link<T>(
    erp: &dyn ErpSync,
    tx: &mut T,
    request: &SyncRequest,
    idempotency_key: &str,
    movement_ids: &[i64],
) -> Result<ErpDocument, AppError>
where
    T: MovementRepository + ?Sized,
{
    let document = erp.call(request, idempotency_key).await?;
    tx.link_documents(movement_ids, &document).await?;
    Ok(document)
}

/// Putaway, issue, internal move and warehouse transfer.
///
/// Each call runs in a single [`OperationScope`]: every leg, the optional ERP
/// document and the idempotency record commit together or not at all.
#[derive(Clone)]
pub struct MovementService<S: Store> {
    store: S,
    erp: Arc<dyn ErpSync>,
    auditor: Auditor,
}

impl<S: Store> MovementService<S> {
    pub fn new(store: S, erp: Arc<dyn ErpSync>, auditor: Auditor) -> Self {
        Self { store, erp, auditor }
    }

    // ---
    // PUTAWAY (RECEIPT)
    // ---

    #[tracing::instrument(skip(self, request, actor), fields(warehouse = %request.warehouse, user = %actor.username))]
    pub async fn putaway(&self, request: PutawayRequest, actor: &Actor) -> Result<MovementsCreated, AppError> {
        actor.validate()?;
        request.validate()?;

        let key = IdempotencyKey::resolve(request.idempotency_key.as_deref());
        let mut scope = match OperationScope::open(&self.store, OperationKind::Putaway, key).await? {
            Admission::Replay(result) => return Ok(result),
            Admission::Fresh(scope) => scope,
        };

        let key = scope.key().clone();
        let outcome = self.putaway_in(scope.tx(), &request, &key, actor).await;
        let result = scope.finish(outcome).await?;

        tracing::info!(movements = result.movements_created, "Putaway completed");
        self.auditor
            .record(actor, OperationKind::Putaway, json!({ "request": request, "result": result }))
            .await;
        Ok(result)
    }

    async fn putaway_in(
        &self,
        tx: &mut S::Tx,
        request: &PutawayRequest,
        key: &IdempotencyKey,
        actor: &Actor,
    ) -> Result<MovementsCreated, AppError> {
        let reference = format!("PUTAWAY-{key}");
        let mut movement_ids = Vec::with_capacity(request.lines.len());

        for line in &request.lines {
            let destination = Endpoint::new(&request.warehouse, line.to_location);

            // 1. Ledger
            tx.increment(&destination.stock_key(&line.item, line.lot.as_deref()), line.qty)
                .await?;

            // 2. Movement log
            let id = tx
                .record_movement(&NewMovement {
                    movement_type: MovementType::Receipt,
                    source: None,
                    destination: Some(destination),
                    item_code: line.item.clone(),
                    lot_no: line.lot.clone(),
                    quantity: line.qty,
                    reference: reference.clone(),
                    idempotency_key: key.to_string(),
                    created_by: actor.username.clone(),
                })
                .await?;
            movement_ids.push(id);
        }

        // 3. Good Receipt, inside the same unit
        let erp_document = if request.sync_erp {
            let sync = SyncRequest::GoodReceipt(DocumentPayload {
                whs: request.warehouse.clone(),
                reference,
                lines: request
                    .lines
                    .iter()
                    .map(|l| DocumentLine { item: l.item.clone(), qty: l.qty, lot: l.lot.clone() })
                    .collect(),
            });
            Some(sync_and_link(self.erp.as_ref(), tx, &sync, key.as_str(), &movement_ids).await?)
        } else {
            None
        };

        Ok(MovementsCreated {
            movements_created: movement_ids.len(),
            movement_ids,
            idempotency_key: key.to_string(),
            erp_document,
        })
    }

    // ---
    // ISSUE
    // ---

    #[tracing::instrument(skip(self, request, actor), fields(warehouse = %request.warehouse, user = %actor.username))]
    pub async fn issue(&self, request: IssueRequest, actor: &Actor) -> Result<MovementsCreated, AppError> {
        actor.validate()?;
        request.validate()?;

        let key = IdempotencyKey::resolve(request.idempotency_key.as_deref());
        let mut scope = match OperationScope::open(&self.store, OperationKind::Issue, key).await? {
            Admission::Replay(result) => return Ok(result),
            Admission::Fresh(scope) => scope,
        };

        let key = scope.key().clone();
        let outcome = self.issue_in(scope.tx(), &request, &key, actor).await;
        let result = scope.finish(outcome).await?;

        tracing::info!(movements = result.movements_created, "Issue completed");
        self.auditor
            .record(actor, OperationKind::Issue, json!({ "request": request, "result": result }))
            .await;
        Ok(result)
    }

    async fn issue_in(
        &self,
        tx: &mut S::Tx,
        request: &IssueRequest,
        key: &IdempotencyKey,
        actor: &Actor,
    ) -> Result<MovementsCreated, AppError> {
        let reference = format!("ISSUE-{}-{}", request.reason, key);
        let mut movement_ids = Vec::with_capacity(request.lines.len());

        for line in &request.lines {
            let source = Endpoint::new(&request.warehouse, line.from_location);

            // 1. Ledger; a short line aborts the whole unit
            take_stock(tx, &source.stock_key(&line.item, line.lot.as_deref()), line.qty).await?;

            // 2. Movement log
            let id = tx
                .record_movement(&NewMovement {
                    movement_type: MovementType::Issue,
                    source: Some(source),
                    destination: None,
                    item_code: line.item.clone(),
                    lot_no: line.lot.clone(),
                    quantity: line.qty,
                    reference: reference.clone(),
                    idempotency_key: key.to_string(),
                    created_by: actor.username.clone(),
                })
                .await?;
            movement_ids.push(id);
        }

        // 3. Good Issue, inside the same unit
        let erp_document = if request.sync_erp {
            let sync = SyncRequest::GoodIssue(DocumentPayload {
                whs: request.warehouse.clone(),
                reference: request
                    .erp_reference
                    .clone()
                    .unwrap_or_else(|| format!("ISSUE-{key}")),
                lines: request
                    .lines
                    .iter()
                    .map(|l| DocumentLine { item: l.item.clone(), qty: l.qty, lot: l.lot.clone() })
                    .collect(),
            });
            Some(sync_and_link(self.erp.as_ref(), tx, &sync, key.as_str(), &movement_ids).await?)
        } else {
            None
        };

        Ok(MovementsCreated {
            movements_created: movement_ids.len(),
            movement_ids,
            idempotency_key: key.to_string(),
            erp_document,
        })
    }

    // ---
    // INTERNAL MOVE
    // ---

    #[tracing::instrument(skip(self, request, actor), fields(warehouse = %request.warehouse, user = %actor.username))]
    pub async fn internal_move(&self, request: InternalMoveRequest, actor: &Actor) -> Result<MovementsCreated, AppError> {
        actor.validate()?;
        request.validate()?;
        if let Some(line) = request.moves.iter().find(|m| m.from_location == m.to_location) {
            return Err(AppError::InvalidInput(format!(
                "item {} cannot be moved from location {} onto itself",
                line.item, line.from_location
            )));
        }

        let key = IdempotencyKey::resolve(request.idempotency_key.as_deref());
        let mut scope = match OperationScope::open(&self.store, OperationKind::InternalMove, key).await? {
            Admission::Replay(result) => return Ok(result),
            Admission::Fresh(scope) => scope,
        };

        let key = scope.key().clone();
        let reference = format!("INTERNAL-{key}");
        let outcome = self
            .relocate(
                scope.tx(),
                MovementType::MoveInternal,
                &request.warehouse,
                &request.warehouse,
                &request.moves,
                &reference,
                &key,
                actor,
            )
            .await
            .map(|movement_ids| MovementsCreated {
                movements_created: movement_ids.len(),
                movement_ids,
                idempotency_key: key.to_string(),
                erp_document: None,
            });
        let result = scope.finish(outcome).await?;

        tracing::info!(movements = result.movements_created, "Internal move completed");
        self.auditor
            .record(actor, OperationKind::InternalMove, json!({ "request": request, "result": result }))
            .await;
        Ok(result)
    }

    // ---
    // WAREHOUSE TRANSFER
    // ---

    #[tracing::instrument(
        skip(self, request, actor),
        fields(from = %request.from_warehouse, to = %request.to_warehouse, user = %actor.username)
    )]
    pub async fn warehouse_transfer(
        &self,
        request: WarehouseTransferRequest,
        actor: &Actor,
    ) -> Result<MovementsCreated, AppError> {
        actor.validate()?;
        request.validate()?;
        if request.from_warehouse == request.to_warehouse {
            return Err(AppError::InvalidInput(format!(
                "transfer source and destination are both {}",
                request.from_warehouse
            )));
        }

        let key = IdempotencyKey::resolve(request.idempotency_key.as_deref());
        let mut scope = match OperationScope::open(&self.store, OperationKind::WarehouseTransfer, key).await? {
            Admission::Replay(result) => return Ok(result),
            Admission::Fresh(scope) => scope,
        };

        let key = scope.key().clone();
        let outcome = self.transfer_in(scope.tx(), &request, &key, actor).await;
        let result = scope.finish(outcome).await?;

        tracing::info!(movements = result.movements_created, "Warehouse transfer completed");
        self.auditor
            .record(actor, OperationKind::WarehouseTransfer, json!({ "request": request, "result": result }))
            .await;
        Ok(result)
    }

    async fn transfer_in(
        &self,
        tx: &mut S::Tx,
        request: &WarehouseTransferRequest,
        key: &IdempotencyKey,
        actor: &Actor,
    ) -> Result<MovementsCreated, AppError> {
        let reference = format!("TRANSFER-{key}");
        let movement_ids = self
            .relocate(
                tx,
                MovementType::TransferWarehouse,
                &request.from_warehouse,
                &request.to_warehouse,
                &request.moves,
                &reference,
                key,
                actor,
            )
            .await?;

        // Inventory Transfer; a failure here undoes every leg above
        let erp_document = if request.sync_erp {
            let sync = SyncRequest::InventoryTransfer(TransferPayload {
                from_whs: request.from_warehouse.clone(),
                to_whs: request.to_warehouse.clone(),
                reference,
                lines: request
                    .moves
                    .iter()
                    .map(|m| DocumentLine { item: m.item.clone(), qty: m.qty, lot: m.lot.clone() })
                    .collect(),
            });
            Some(sync_and_link(self.erp.as_ref(), tx, &sync, key.as_str(), &movement_ids).await?)
        } else {
            None
        };

        Ok(MovementsCreated {
            movements_created: movement_ids.len(),
            movement_ids,
            idempotency_key: key.to_string(),
            erp_document,
        })
    }

    /// Legs run in caller order: debit the source, credit the destination,
    /// log one movement with both endpoints.
    #[allow(clippy::too_many_arguments)]
    async fn relocate(
        &self,
        tx: &mut S::Tx,
        movement_type: MovementType,
        from_warehouse: &str,
        to_warehouse: &str,
        moves: &[MoveLine],
        reference: &str,
        key: &IdempotencyKey,
        actor: &Actor,
    ) -> Result<Vec<i64>, AppError> {
        let mut movement_ids = Vec::with_capacity(moves.len());

        for line in moves {
            let source = Endpoint::new(from_warehouse, line.from_location);
            let destination = Endpoint::new(to_warehouse, line.to_location);
            let lot = line.lot.as_deref();

            // 1. Debit source, then credit destination
            take_stock(tx, &source.stock_key(&line.item, lot), line.qty).await?;
            tx.increment(&destination.stock_key(&line.item, lot), line.qty).await?;

            // 2. One movement carrying both endpoints
            let id = tx
                .record_movement(&NewMovement {
                    movement_type,
                    source: Some(source),
                    destination: Some(destination),
                    item_code: line.item.clone(),
                    lot_no: line.lot.clone(),
                    quantity: line.qty,
                    reference: reference.to_string(),
                    idempotency_key: key.to_string(),
                    created_by: actor.username.clone(),
                })
                .await?;
            movement_ids.push(id);
        }

        Ok(movement_ids)
    }
}
