// src/models/operations.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

use crate::models::counting::CountDetail;
use crate::models::movement::{ErpDocument, MovementType};

// =============================================================================
//  IDENTITY & KEYS
// =============================================================================

/// The already-authenticated caller. Authorization happens upstream; the
/// engine only records who did what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[validate(length(min = 1, max = 64, message = "username is required"))]
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Actor {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into(), roles: Vec::new() }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }
}

/// Every mutating call is deduplicated on (kind, key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Putaway,
    Issue,
    InternalMove,
    WarehouseTransfer,
    CreateCountSession,
    EnterCounts,
    ApplyCountAdjustments,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Putaway => "putaway",
            Self::Issue => "issue",
            Self::InternalMove => "internal_move",
            Self::WarehouseTransfer => "warehouse_transfer",
            Self::CreateCountSession => "create_count_session",
            Self::EnterCounts => "enter_counts",
            Self::ApplyCountAdjustments => "apply_count_adjustments",
        }
    }

    /// Operation-level failure code reported next to the error taxonomy code.
    pub fn failure_code(&self) -> &'static str {
        match self {
            Self::Putaway => "PUTAWAY_FAILED",
            Self::Issue => "ISSUE_FAILED",
            Self::InternalMove => "INTERNAL_MOVE_FAILED",
            Self::WarehouseTransfer => "TRANSFER_FAILED",
            Self::CreateCountSession => "CREATE_COUNT_FAILED",
            Self::EnterCounts => "ENTER_COUNTS_FAILED",
            Self::ApplyCountAdjustments => "APPLY_ADJUSTMENTS_FAILED",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Uses the caller's key when present, otherwise a fresh UUIDv4.
    pub fn resolve(supplied: Option<&str>) -> Self {
        match supplied {
            Some(key) => Self(key.to_owned()),
            None => Self::generate(),
        }
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key for one of several sync calls made by a single operation.
    pub fn derived(&self, suffix: &str) -> String {
        format!("{}-{}", self.0, suffix)
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---
// Custom validators
// ---

/// Decimal places the ledger keeps (`NUMERIC(15, 3)`).
pub const QUANTITY_SCALE: u32 = 3;

/// Largest quantity a ledger row, movement or count can hold. Fifteen
/// significant digits also survive the `f64` used by the JSON payloads.
pub fn max_quantity() -> Decimal {
    Decimal::new(999_999_999_999_999, QUANTITY_SCALE)
}

fn validate_quantity_shape(qty: &Decimal) -> Result<(), ValidationError> {
    if qty.round_dp(QUANTITY_SCALE) != *qty {
        return Err(ValidationError::new("scale")
            .with_message(format!("quantity allows at most {QUANTITY_SCALE} decimal places").into()));
    }
    if *qty > max_quantity() {
        return Err(ValidationError::new("range")
            .with_message(format!("quantity cannot exceed {}", max_quantity()).into()));
    }
    Ok(())
}

pub(crate) fn validate_positive(qty: &Decimal) -> Result<(), ValidationError> {
    if *qty <= Decimal::ZERO {
        return Err(ValidationError::new("positive").with_message("quantity must be greater than zero".into()));
    }
    validate_quantity_shape(qty)
}

pub(crate) fn validate_non_negative(qty: &Decimal) -> Result<(), ValidationError> {
    if *qty < Decimal::ZERO {
        return Err(ValidationError::new("non_negative").with_message("counted quantity cannot be negative".into()));
    }
    validate_quantity_shape(qty)
}

pub(crate) fn validate_warehouse_code(code: &str) -> Result<(), ValidationError> {
    if !code.is_empty() && code.len() <= 8 && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ValidationError::new("warehouse_code")
            .with_message("warehouse code must be 1-8 alphanumeric characters".into()))
    }
}

pub(crate) fn validate_idempotency_key(key: &str) -> Result<(), ValidationError> {
    let well_formed = (8..=64).contains(&key.len())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::new("idempotency_key")
            .with_message("idempotency key must be 8-64 characters of [A-Za-z0-9_-]".into()))
    }
}

// =============================================================================
//  MOVEMENT COMMANDS
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PutawayLine {
    #[validate(length(min = 1, max = 50))]
    pub item: String,
    #[validate(length(min = 1, max = 100))]
    pub lot: Option<String>,
    #[validate(custom(function = "validate_positive"))]
    pub qty: Decimal,
    pub to_location: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PutawayRequest {
    #[validate(custom(function = "validate_warehouse_code"))]
    pub warehouse: String,
    #[validate(length(min = 1, message = "at least one line is required"), nested)]
    pub lines: Vec<PutawayLine>,
    /// Post a Good Receipt to the system of record inside the same unit.
    #[serde(default)]
    pub sync_erp: bool,
    #[validate(custom(function = "validate_idempotency_key"))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IssueLine {
    #[validate(length(min = 1, max = 50))]
    pub item: String,
    #[validate(length(min = 1, max = 100))]
    pub lot: Option<String>,
    #[validate(custom(function = "validate_positive"))]
    pub qty: Decimal,
    pub from_location: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    #[validate(custom(function = "validate_warehouse_code"))]
    pub warehouse: String,
    #[validate(length(min = 1, max = 40))]
    pub reason: String,
    #[validate(length(min = 1, message = "at least one line is required"), nested)]
    pub lines: Vec<IssueLine>,
    #[serde(default)]
    pub sync_erp: bool,
    /// Overrides the Good Issue reference (defaults to `ISSUE-<key>`).
    #[validate(length(min = 1, max = 100))]
    pub erp_reference: Option<String>,
    #[validate(custom(function = "validate_idempotency_key"))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MoveLine {
    #[validate(length(min = 1, max = 50))]
    pub item: String,
    #[validate(length(min = 1, max = 100))]
    pub lot: Option<String>,
    #[validate(custom(function = "validate_positive"))]
    pub qty: Decimal,
    pub from_location: i64,
    pub to_location: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InternalMoveRequest {
    #[validate(custom(function = "validate_warehouse_code"))]
    pub warehouse: String,
    #[validate(length(min = 1, message = "at least one move is required"), nested)]
    pub moves: Vec<MoveLine>,
    #[validate(custom(function = "validate_idempotency_key"))]
    pub idempotency_key: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseTransferRequest {
    #[validate(custom(function = "validate_warehouse_code"))]
    pub from_warehouse: String,
    #[validate(custom(function = "validate_warehouse_code"))]
    pub to_warehouse: String,
    #[validate(length(min = 1, message = "at least one move is required"), nested)]
    pub moves: Vec<MoveLine>,
    #[serde(default = "default_true")]
    pub sync_erp: bool,
    #[validate(custom(function = "validate_idempotency_key"))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementsCreated {
    pub movements_created: usize,
    pub movement_ids: Vec<i64>,
    pub idempotency_key: String,
    pub erp_document: Option<ErpDocument>,
}

// =============================================================================
//  COUNT COMMANDS
// =============================================================================

/// Locations to count plus any caller metadata, passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CountScope {
    #[validate(length(min = 1, message = "at least one location is required"))]
    pub locations: Vec<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCountSessionRequest {
    #[validate(custom(function = "validate_warehouse_code"))]
    pub warehouse: String,
    #[validate(nested)]
    pub scope: CountScope,
    #[validate(custom(function = "validate_idempotency_key"))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: i64,
    pub details_captured: usize,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CountEntry {
    pub detail_id: i64,
    #[validate(custom(function = "validate_non_negative"))]
    pub counted_qty: Decimal,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnterCountsRequest {
    pub session_id: i64,
    #[validate(length(min = 1, message = "at least one count is required"), nested)]
    pub counts: Vec<CountEntry>,
    #[validate(custom(function = "validate_idempotency_key"))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountsEntered {
    pub counts_entered: usize,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCountRequest {
    pub session_id: i64,
    #[serde(default = "default_true")]
    pub create_erp_adjustments: bool,
    #[validate(length(max = 60))]
    pub comment: Option<String>,
    #[validate(custom(function = "validate_idempotency_key"))]
    pub idempotency_key: Option<String>,
}

impl ApplyCountRequest {
    pub const DEFAULT_COMMENT: &'static str = "Cycle count adjustment";

    pub fn comment(&self) -> &str {
        self.comment
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(Self::DEFAULT_COMMENT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjustment {
    pub detail_id: i64,
    pub movement_id: i64,
    pub movement_type: MovementType,
    pub location_id: i64,
    pub item_code: String,
    pub lot_no: Option<String>,
    /// counted - expected
    pub diff: Decimal,
}

impl Adjustment {
    pub fn from_detail(detail: &CountDetail, movement_id: i64, diff: Decimal) -> Self {
        Self {
            detail_id: detail.id,
            movement_id,
            movement_type: if diff > Decimal::ZERO { MovementType::AdjustPos } else { MovementType::AdjustNeg },
            location_id: detail.location_id,
            item_code: detail.item_code.clone(),
            lot_no: detail.lot_no.clone(),
            diff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentsApplied {
    pub adjustments_applied: usize,
    pub adjustments: Vec<Adjustment>,
    pub erp_documents: Vec<ErpDocument>,
    pub idempotency_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(qty: i64) -> PutawayLine {
        PutawayLine { item: "A".into(), lot: None, qty: Decimal::from(qty), to_location: 10 }
    }

    #[test]
    fn putaway_requires_positive_quantities() {
        let request = PutawayRequest {
            warehouse: "WH1".into(),
            lines: vec![line(5), line(0)],
            sync_erp: false,
            idempotency_key: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn quantities_finer_than_the_ledger_scale_are_rejected() {
        let dec = |v: &str| v.parse::<Decimal>().unwrap();

        assert!(validate_positive(&dec("0.0004")).is_err());
        assert!(validate_positive(&dec("1.0004")).is_err());
        assert!(validate_non_negative(&dec("2.5001")).is_err());

        assert!(validate_positive(&dec("0.001")).is_ok());
        assert!(validate_positive(&dec("1.0000")).is_ok());
        assert!(validate_non_negative(&Decimal::ZERO).is_ok());

        let mut fine = line(1);
        fine.qty = dec("1.0004");
        assert!(fine.validate().is_err());
    }

    #[test]
    fn largest_quantity_survives_json_exactly() {
        assert!(validate_positive(&max_quantity()).is_ok());
        assert!(validate_positive(&(max_quantity() + Decimal::new(1, 3))).is_err());

        let mut big = line(1);
        big.qty = "123456789012.345".parse().unwrap();
        assert!(big.validate().is_ok());
        let back: PutawayLine = serde_json::from_value(serde_json::to_value(&big).unwrap()).unwrap();
        assert_eq!(back.qty, big.qty);
    }

    #[test]
    fn empty_lot_is_rejected_but_absent_lot_is_fine() {
        let mut ok = line(1);
        assert!(ok.validate().is_ok());
        ok.lot = Some(String::new());
        assert!(ok.validate().is_err());
    }

    #[test]
    fn warehouse_codes_are_short_and_alphanumeric() {
        assert!(validate_warehouse_code("WH01").is_ok());
        assert!(validate_warehouse_code("").is_err());
        assert!(validate_warehouse_code("WAREHOUSE1").is_err());
        assert!(validate_warehouse_code("WH-1").is_err());
    }

    #[test]
    fn generated_keys_pass_caller_key_rules() {
        let key = IdempotencyKey::generate();
        assert!(validate_idempotency_key(key.as_str()).is_ok());
        assert!(validate_idempotency_key("short").is_err());
        assert!(validate_idempotency_key("has spaces in it").is_err());
        assert_eq!(IdempotencyKey::resolve(Some("abcdefgh")).derived("POS"), "abcdefgh-POS");
    }

    #[test]
    fn scope_keeps_unknown_fields() {
        let scope: CountScope =
            serde_json::from_value(serde_json::json!({"locations": [10, 11], "zone": "cold"})).unwrap();
        assert_eq!(scope.locations, vec![10, 11]);
        assert_eq!(scope.extra.get("zone"), Some(&Value::from("cold")));
    }

    #[test]
    fn apply_comment_falls_back_to_default() {
        let request = ApplyCountRequest {
            session_id: 1,
            create_erp_adjustments: false,
            comment: Some("  ".into()),
            idempotency_key: None,
        };
        assert_eq!(request.comment(), ApplyCountRequest::DEFAULT_COMMENT);
    }
}
