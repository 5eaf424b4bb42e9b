use std::sync::Arc;

use anyhow::Context;
use scanpay_reconciler::application::TokioScheduler;
use scanpay_reconciler::config::AppConfig;
use scanpay_reconciler::domain::ProviderGateways;
use scanpay_reconciler::infrastructure::{
    HttpCallbackSender, MemoryMerchantStore, MemoryOrderStore, RedisKeyValueStore,
};
use scanpay_reconciler::shared::LoggingUtils;
use scanpay_reconciler::{EngineDeps, ReconciliationEngine};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = LoggingUtils::initialize(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!("Reconciler error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting scan-to-pay reconciler...");

    let kv = RedisKeyValueStore::connect(&config.redis)
        .await
        .context("connecting to redis")?;
    let callbacks = HttpCallbackSender::new(&config.callback).context("building callback client")?;

    // Portal clients and the order/merchant tables are supplied by the
    // embedding service; the standalone daemon runs against empty ones.
    let deps = EngineDeps {
        kv: Arc::new(kv),
        orders: Arc::new(MemoryOrderStore::new()),
        merchants: Arc::new(MemoryMerchantStore::new()),
        gateways: ProviderGateways::new(),
        callbacks: Arc::new(callbacks),
        scheduler: Arc::new(TokioScheduler::new()),
    };

    let engine = ReconciliationEngine::new(config, deps).context("building engine")?;
    if engine.start_health_probe()? {
        info!("Upstream probe started");
    }

    let health = engine.health().await?;
    info!(status = %health.status, "Reconciler started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("Shutdown signal received");
    let stopped = engine.shutdown();
    info!(stopped, "Reconciler stopped");
    Ok(())
}
