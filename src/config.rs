// src/config.rs

use std::{env, str::FromStr, sync::Arc, time::Duration};

use anyhow::{Context, anyhow};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing_subscriber::EnvFilter;

use crate::{
    db::{PgAuditRepository, PgStore},
    models::counting::ReconciliationPolicy,
    services::{Auditor, CountingService, MovementService, RetryPolicy, SapClient, StockService},
};

/// Everything read from the environment (and `.env`, if present).
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub sap_base_url: String,
    pub sap_retry: RetryPolicy,
    pub count_policy: ReconciliationPolicy,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

        let retry_delay_ms: u64 = parse_or(&lookup, "SAP_RETRY_DELAY_MS", 1000)?;
        let timeout_secs: u64 = parse_or(&lookup, "SAP_TIMEOUT_SECS", 30)?;

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            sap_base_url: lookup("SAP_DI_BASE_URL").unwrap_or_else(|| "http://localhost:8001".to_string()),
            sap_retry: RetryPolicy {
                max_attempts: parse_or(&lookup, "SAP_MAX_ATTEMPTS", 3)?,
                retry_delay: Duration::from_millis(retry_delay_ms),
                attempt_timeout: Duration::from_secs(timeout_secs),
            },
            count_policy: match lookup("COUNT_POLICY") {
                Some(raw) => raw.parse().map_err(|e: String| anyhow!(e))?,
                None => ReconciliationPolicy::default(),
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{name} has an invalid value {raw:?}: {e}")),
        None => Ok(default),
    }
}

/// Compact fmt subscriber; level from `RUST_LOG`, `info` otherwise.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub sap_client: Arc<SapClient>,
    pub audit_repo: PgAuditRepository,
    pub movement_service: MovementService<PgStore>,
    pub counting_service: CountingService<PgStore>,
    pub stock_service: StockService<PgStore>,
}

impl AppState {
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let db_pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.database_url)
            .await?;

        tracing::info!("Database connection established");

        // --- Dependency graph ---
        let store = PgStore::new(db_pool.clone());
        let sap_client = Arc::new(SapClient::new(config.sap_base_url.clone(), config.sap_retry.clone())?);
        let audit_repo = PgAuditRepository::new(db_pool.clone());
        let auditor = Auditor::new(Arc::new(audit_repo.clone()));

        let movement_service = MovementService::new(store.clone(), sap_client.clone(), auditor.clone());
        let counting_service = CountingService::new(store.clone(), sap_client.clone(), auditor, config.count_policy);
        let stock_service = StockService::new(store);

        Ok(Self {
            db_pool,
            sap_client,
            audit_repo,
            movement_service,
            counting_service,
            stock_service,
        })
    }
}
