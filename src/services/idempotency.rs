// src/services/idempotency.rs

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    common::error::AppError,
    db::{Claim, IdempotencyRepository, Store, StoreTx},
    models::operations::{IdempotencyKey, OperationKind},
};

/// What `OperationScope::open` found for `(operation, key)`.
pub enum Admission<S: Store, T> {
    /// First execution. Run the operation inside the scope.
    Fresh(OperationScope<S>),
    /// Completed earlier; this is the stored result, nothing was re-executed.
    Replay(T),
}

/// One orchestrated call: a storage transaction whose first statement claims
/// the idempotency key and whose last statement stores the result.
///
/// Effects and the stored result commit together, so a claim only survives
/// when the operation succeeded. Dropping the scope rolls everything back.
pub struct OperationScope<S: Store> {
    tx: S::Tx,
    operation: OperationKind,
    key: IdempotencyKey,
}

impl<S: Store> OperationScope<S> {
    pub async fn open<T: DeserializeOwned>(
        store: &S,
        operation: OperationKind,
        key: IdempotencyKey,
    ) -> Result<Admission<S, T>, AppError> {
        let mut tx = store.begin().await?;

        match tx.claim(operation, key.as_str()).await? {
            Claim::Fresh => Ok(Admission::Fresh(Self { tx, operation, key })),
            Claim::Completed(stored) => {
                tx.rollback().await?;
                tracing::info!(%operation, key = %key, "Replaying stored result");
                Ok(Admission::Replay(serde_json::from_value(stored)?))
            }
        }
    }

    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }

    pub fn tx(&mut self) -> &mut S::Tx {
        &mut self.tx
    }

    /// Commits with the result stored on `Ok`; rolls back on `Err` and hands
    /// the original error back.
    pub async fn finish<T: Serialize>(mut self, outcome: Result<T, AppError>) -> Result<T, AppError> {
        match outcome {
            Ok(result) => {
                let stored = serde_json::to_value(&result)?;
                self.tx.complete(self.operation, self.key.as_str(), &stored).await?;
                self.tx.commit().await?;
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = self.tx.rollback().await {
                    tracing::error!(operation = %self.operation, "Rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}
