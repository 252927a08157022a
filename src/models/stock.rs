// src/models/stock.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Identity of one ledger row: (warehouse, location, item, lot).
///
/// `lot: None` means "no lot". It is a value of its own: it equals only
/// another `None`, never an empty string or any real lot number. The
/// Postgres side mirrors this with `IS NOT DISTINCT FROM` and a
/// `NULLS NOT DISTINCT` unique index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockKey {
    pub warehouse: String,
    pub location_id: i64,
    pub item_code: String,
    pub lot_no: Option<String>,
}

impl StockKey {
    pub fn new(
        warehouse: impl Into<String>,
        location_id: i64,
        item_code: impl Into<String>,
        lot_no: Option<String>,
    ) -> Self {
        Self {
            warehouse: warehouse.into(),
            location_id,
            item_code: item_code.into(),
            lot_no,
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.lot_no {
            Some(lot) => write!(f, "{}/{}/{}#{}", self.warehouse, self.location_id, self.item_code, lot),
            None => write!(f, "{}/{}/{}", self.warehouse, self.location_id, self.item_code),
        }
    }
}

// --- Ledger row (stock_location table) ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StockRecord {
    pub warehouse: String,
    pub location_id: i64,
    pub item_code: String,
    pub lot_no: Option<String>,
    pub quantity: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl StockRecord {
    pub fn key(&self) -> StockKey {
        StockKey::new(
            self.warehouse.clone(),
            self.location_id,
            self.item_code.clone(),
            self.lot_no.clone(),
        )
    }
}

/// Outcome of a conditional decrement.
#[derive(Debug, Clone, PartialEq)]
pub enum Decrement {
    Applied(StockRecord),
    /// Nothing matched `quantity >= requested`; the row (if any) is untouched.
    Insufficient,
}

/// Aggregate used for reconciliation against the system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StockSummary {
    pub warehouse: String,
    pub item_code: String,
    pub total_quantity: Decimal,
    pub location_count: i64,
}
