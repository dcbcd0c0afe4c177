//! cityhubd — city IoT gateway daemon.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use cityhub_core::config::HubConfig;
use cityhubd::Gateway;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load config
    if let Err(e) = HubConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = HubConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        HubConfig::default()
    });
    tracing::info!(id = %config.gateway.id, "cityhubd starting");

    let gateway = Gateway::bind(&config).await?;

    // ── Shutdown ─────────────────────────────────────────────────────────────
    let (trigger, shutdown) = cityhubd::shutdown::channel();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        trigger.trigger();
    });

    gateway.run(shutdown).await;
    Ok(())
}
