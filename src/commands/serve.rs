use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::coingecko::CoinGeckoClient;
use crate::config::Config;
use crate::services::exchange_service::ExchangeService;
use crate::services::payment_processor::PaymentProcessor;
use crate::services::{report_service, wallet_service};
use crate::web::{create_router, AppState};

/// Serve the HTTP API until Ctrl+C, then stop the background tasks
pub async fn execute(config: Config) -> Result<()> {
    let ctx = super::build_context(&config, true).await?;
    info!("Database ready at {}", config.database_url);

    let synced = wallet_service::sync_from_config(&ctx.pool, &config.wallet_addresses, Utc::now()).await?;
    info!("Synced {} wallet addresses from environment", synced);

    if config.admin_token.is_none() {
        warn!("ADMIN_TOKEN is not set; admin routes are unprotected");
    }
    if ctx.verifier.simulation_mode() {
        warn!("Simulation mode is on; payments are confirmed without on-chain checks");
    }

    if ctx.email.start().await {
        info!("Email notifications enabled");
    } else if !ctx.email.is_configured() {
        warn!("Email is not configured; notifications are disabled");
    }

    let processor = PaymentProcessor::new(ctx.clone(), config.payment_check_interval);
    let processor = Arc::new(processor.start());

    let (scheduler_tx, scheduler_rx) = watch::channel(false);
    let scheduler = if config.report_scheduler_enabled {
        Some(tokio::spawn(report_service::run_scheduler(
            ctx.pool.clone(),
            ctx.email.clone(),
            config.reports_email.clone(),
            config.daily_report_time,
            scheduler_rx,
        )))
    } else {
        None
    };

    let coingecko = CoinGeckoClient::new(config.coingecko_api_key.clone()).context("Failed to build price client")?;
    let exchange = Arc::new(ExchangeService::new(coingecko, config.rates_cache_ttl));

    let state = AppState {
        ctx: ctx.clone(),
        processor: Some(processor.clone()),
        exchange,
        public_base_url: config.public_base_url.clone(),
        admin_token: config.admin_token.clone(),
        app_env: config.app_env,
    };
    let app = create_router(state);

    let listener = TcpListener::bind(&config.api_address())
        .await
        .with_context(|| format!("Failed to bind to {}", config.api_address()))?;

    info!("Paylink listening on {} ({})", config.api_address(), config.app_env);
    info!("Health check: http://{}/health", config.api_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    processor.stop().await;
    let _ = scheduler_tx.send(true);
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }
    ctx.email.stop().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C");
}
