pub mod sap_client;
pub use sap_client::{ErpSync, RetryPolicy, SapClient, SyncError, SyncRequest};
pub mod idempotency;
pub mod audit;
pub use audit::Auditor;
pub mod movement_service;
pub use movement_service::MovementService;
pub mod counting_service;
pub use counting_service::CountingService;
pub mod stock_service;
pub use stock_service::StockService;
