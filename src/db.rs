pub mod store;
pub use store::{Store, StoreTx};
pub mod ledger_repo;
pub use ledger_repo::LedgerRepository;
pub mod movement_repo;
pub use movement_repo::MovementRepository;
pub mod count_repo;
pub use count_repo::CountRepository;
pub mod idempotency_repo;
pub use idempotency_repo::{Claim, IdempotencyRepository};
pub mod audit_repo;
pub use audit_repo::{AuditSink, PgAuditRepository};

pub mod postgres;
pub use postgres::{run_migrations, PgStore, PgTx};
pub mod memory;
pub use memory::{MemoryAuditSink, MemoryStore, MemoryTx};
