// src/models/counting.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::stock::StockKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "count_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CountSession {
    pub id: i64,
    pub warehouse: String,
    pub status: CountStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl CountSession {
    pub fn is_open(&self) -> bool {
        self.status == CountStatus::Open
    }
}

/// One counted line. `expected_qty` is captured once at session creation and
/// never written again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CountDetail {
    pub id: i64,
    pub session_id: i64,
    pub location_id: i64,
    pub item_code: String,
    pub lot_no: Option<String>,
    pub expected_qty: Decimal,
    pub counted_qty: Option<Decimal>,
    pub adjusted: bool,
}

impl CountDetail {
    pub fn stock_key(&self, warehouse: &str) -> StockKey {
        StockKey::new(warehouse, self.location_id, self.item_code.clone(), self.lot_no.clone())
    }
}

/// Row to snapshot into a new session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCountDetail {
    pub location_id: i64,
    pub item_code: String,
    pub lot_no: Option<String>,
    pub expected_qty: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountSessionFilter {
    pub warehouse: Option<String>,
    pub status: Option<CountStatus>,
    pub limit: Option<i64>,
}

impl CountSessionFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountSessionDetails {
    pub session: CountSession,
    pub details: Vec<CountDetail>,
}

/// How an applied count changes the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationPolicy {
    /// The physical count is ground truth: the ledger row is overwritten with
    /// `counted_qty` (last writer wins). Any ledger change made between the
    /// snapshot and the apply is discarded.
    #[default]
    GroundTruth,
    /// `counted - expected` is applied as a delta to the current ledger value.
    /// Negative deltas use the conditional decrement and can fail with
    /// insufficient stock.
    DeltaAgainstLedger,
}

impl std::str::FromStr for ReconciliationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GROUND_TRUTH" => Ok(Self::GroundTruth),
            "DELTA_AGAINST_LEDGER" | "DELTA" => Ok(Self::DeltaAgainstLedger),
            other => Err(format!("unknown reconciliation policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_limit_is_clamped() {
        let mut filter = CountSessionFilter::default();
        assert_eq!(filter.effective_limit(), 50);
        filter.limit = Some(10_000);
        assert_eq!(filter.effective_limit(), 500);
        filter.limit = Some(0);
        assert_eq!(filter.effective_limit(), 1);
    }

    #[test]
    fn policy_parses_from_env_values() {
        assert_eq!("ground_truth".parse(), Ok(ReconciliationPolicy::GroundTruth));
        assert_eq!("delta".parse(), Ok(ReconciliationPolicy::DeltaAgainstLedger));
        assert!("whatever".parse::<ReconciliationPolicy>().is_err());
    }
}
