// src/db/store.rs

use async_trait::async_trait;

use crate::{
    common::error::AppError,
    db::{CountRepository, IdempotencyRepository, LedgerRepository, MovementRepository},
    models::{
        counting::{CountDetail, CountSession, CountSessionFilter},
        movement::Movement,
        stock::{StockKey, StockRecord, StockSummary},
    },
};

/// Handle to the backing storage.
///
/// Mutations only happen through a [`StoreTx`] obtained from [`Store::begin`];
/// one transaction per orchestrated call. The read models below run outside
/// any transaction and see committed data only.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx, AppError>;

    // --- Ledger read models (rows with quantity > 0) ---
    async fn stock_by_location(&self, warehouse: &str, location_id: i64) -> Result<Vec<StockRecord>, AppError>;
    async fn stock_by_item(&self, warehouse: &str, item_code: &str) -> Result<Vec<StockRecord>, AppError>;
    async fn stock_summary(&self, warehouse: &str, item_code: &str) -> Result<Option<StockSummary>, AppError>;
    /// Exact row lookup, zero-quantity rows included.
    async fn stock_record(&self, key: &StockKey) -> Result<Option<StockRecord>, AppError>;

    async fn movements_by_idempotency_key(&self, key: &str) -> Result<Vec<Movement>, AppError>;

    // --- Count sessions ---
    async fn count_session(&self, id: i64) -> Result<Option<CountSession>, AppError>;
    async fn count_session_details(&self, session_id: i64) -> Result<Vec<CountDetail>, AppError>;
    async fn list_count_sessions(&self, filter: &CountSessionFilter) -> Result<Vec<CountSession>, AppError>;
}

/// One open storage transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait StoreTx:
    LedgerRepository + MovementRepository + CountRepository + IdempotencyRepository + Send
{
    async fn commit(self) -> Result<(), AppError>;
    async fn rollback(self) -> Result<(), AppError>;
}
