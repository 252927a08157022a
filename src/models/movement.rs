// src/models/movement.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::stock::StockKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "movement_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Receipt,
    Issue,
    MoveInternal,
    TransferWarehouse,
    AdjustPos,
    AdjustNeg,
}

/// Document kinds created in the system of record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "erp_document_type", rename_all = "PascalCase")]
pub enum DocumentType {
    GoodReceipt,
    GoodIssue,
    InventoryTransfer,
}

/// A document confirmed by the system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpDocument {
    pub doc_type: DocumentType,
    pub doc_entry: i64,
}

/// One side of a movement: a location inside a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub warehouse: String,
    pub location_id: i64,
}

impl Endpoint {
    pub fn new(warehouse: impl Into<String>, location_id: i64) -> Self {
        Self { warehouse: warehouse.into(), location_id }
    }

    pub fn stock_key(&self, item_code: &str, lot_no: Option<&str>) -> StockKey {
        StockKey::new(
            self.warehouse.clone(),
            self.location_id,
            item_code,
            lot_no.map(str::to_owned),
        )
    }
}

/// Insert shape for the movement log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMovement {
    pub movement_type: MovementType,
    pub source: Option<Endpoint>,
    pub destination: Option<Endpoint>,
    pub item_code: String,
    pub lot_no: Option<String>,
    pub quantity: Decimal,
    pub reference: String,
    pub idempotency_key: String,
    pub created_by: String,
}

// --- Movement log row (movement table) ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub id: i64,
    pub movement_type: MovementType,
    pub whs_code_from: Option<String>,
    pub location_id_from: Option<i64>,
    pub whs_code_to: Option<String>,
    pub location_id_to: Option<i64>,
    pub item_code: String,
    pub lot_no: Option<String>,
    pub quantity: Decimal,
    pub reference: String,
    pub erp_doc_type: Option<DocumentType>,
    pub erp_doc_entry: Option<i64>,
    pub idempotency_key: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    pub fn from_new(id: i64, new: &NewMovement, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            movement_type: new.movement_type,
            whs_code_from: new.source.as_ref().map(|e| e.warehouse.clone()),
            location_id_from: new.source.as_ref().map(|e| e.location_id),
            whs_code_to: new.destination.as_ref().map(|e| e.warehouse.clone()),
            location_id_to: new.destination.as_ref().map(|e| e.location_id),
            item_code: new.item_code.clone(),
            lot_no: new.lot_no.clone(),
            quantity: new.quantity,
            reference: new.reference.clone(),
            erp_doc_type: None,
            erp_doc_entry: None,
            idempotency_key: new.idempotency_key.clone(),
            created_by: new.created_by.clone(),
            created_at,
        }
    }

    pub fn source_key(&self) -> Option<StockKey> {
        let warehouse = self.whs_code_from.clone()?;
        let location_id = self.location_id_from?;
        Some(StockKey::new(warehouse, location_id, self.item_code.clone(), self.lot_no.clone()))
    }

    pub fn destination_key(&self) -> Option<StockKey> {
        let warehouse = self.whs_code_to.clone()?;
        let location_id = self.location_id_to?;
        Some(StockKey::new(warehouse, location_id, self.item_code.clone(), self.lot_no.clone()))
    }

    /// Signed effect of this movement on `key`: positive when `key` is the
    /// destination, negative when it is the source, zero otherwise.
    pub fn signed_quantity_for(&self, key: &StockKey) -> Decimal {
        let mut delta = Decimal::ZERO;
        if self.destination_key().as_ref() == Some(key) {
            delta += self.quantity;
        }
        if self.source_key().as_ref() == Some(key) {
            delta -= self.quantity;
        }
        delta
    }

    pub fn document(&self) -> Option<ErpDocument> {
        Some(ErpDocument {
            doc_type: self.erp_doc_type?,
            doc_entry: self.erp_doc_entry?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(movement_type: MovementType, from: Option<Endpoint>, to: Option<Endpoint>) -> Movement {
        let new = NewMovement {
            movement_type,
            source: from,
            destination: to,
            item_code: "A".into(),
            lot_no: None,
            quantity: Decimal::from(20),
            reference: "REF".into(),
            idempotency_key: "key-00000001".into(),
            created_by: "tester".into(),
        };
        Movement::from_new(1, &new, Utc::now())
    }

    #[test]
    fn internal_move_debits_source_and_credits_destination() {
        let m = movement(
            MovementType::MoveInternal,
            Some(Endpoint::new("WH1", 10)),
            Some(Endpoint::new("WH1", 20)),
        );
        let from = StockKey::new("WH1", 10, "A", None);
        let to = StockKey::new("WH1", 20, "A", None);
        assert_eq!(m.signed_quantity_for(&from), Decimal::from(-20));
        assert_eq!(m.signed_quantity_for(&to), Decimal::from(20));
    }

    #[test]
    fn lot_is_part_of_the_key() {
        let m = movement(MovementType::Receipt, None, Some(Endpoint::new("WH1", 10)));
        let lotted = StockKey::new("WH1", 10, "A", Some("L1".into()));
        assert_eq!(m.signed_quantity_for(&lotted), Decimal::ZERO);
        assert!(m.document().is_none());
    }
}
