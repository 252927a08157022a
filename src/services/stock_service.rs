// src/services/stock_service.rs

use crate::{
    common::error::AppError,
    db::Store,
    models::{
        movement::Movement,
        stock::{StockKey, StockRecord, StockSummary},
    },
};

/// Read models over committed ledger state. Nothing here takes locks.
#[derive(Clone)]
pub struct StockService<S: Store> {
    store: S,
}

impl<S: Store> StockService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn stock_by_location(&self, warehouse: &str, location_id: i64) -> Result<Vec<StockRecord>, AppError> {
        self.store.stock_by_location(warehouse, location_id).await
    }

    pub async fn stock_by_item(&self, warehouse: &str, item_code: &str) -> Result<Vec<StockRecord>, AppError> {
        self.store.stock_by_item(warehouse, item_code).await
    }

    pub async fn stock_summary(&self, warehouse: &str, item_code: &str) -> Result<StockSummary, AppError> {
        self.store
            .stock_summary(warehouse, item_code)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("Stock for item {item_code} in {warehouse}")))
    }

    /// Quantity for one key; zero when the key was never stocked.
    pub async fn quantity(&self, key: &StockKey) -> Result<rust_decimal::Decimal, AppError> {
        Ok(self
            .store
            .stock_record(key)
            .await?
            .map(|r| r.quantity)
            .unwrap_or_default())
    }

    pub async fn movements_by_idempotency_key(&self, key: &str) -> Result<Vec<Movement>, AppError> {
        self.store.movements_by_idempotency_key(key).await
    }
}
