//src/main.rs

use wms_engine::{
    config::{AppConfig, AppState, init_tracing},
    db::run_migrations,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    let app_state = AppState::new(&config).await?;

    run_migrations(&app_state.db_pool).await?;
    tracing::info!("Database migrations applied");

    // The bridge being down is not fatal: operations that sync will fail
    // with SYNC_FAILED until it comes back.
    match app_state.sap_client.health_check().await {
        Ok(()) => tracing::info!(url = %config.sap_base_url, "SAP DI bridge reachable"),
        Err(e) => tracing::warn!(url = %config.sap_base_url, "SAP DI bridge health check failed: {}", e),
    }

    tracing::info!(policy = ?app_state.counting_service.policy(), "WMS engine ready");
    Ok(())
}
