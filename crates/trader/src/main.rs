mod api;
mod audit;
mod config;
mod db;
mod engine;
mod errors;
mod ledger;
mod polymarket;
mod portfolio;
mod risk;
mod types;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use db::TraderDb;
use engine::WalletEngine;
use ledger::ExposureLedger;
use polymarket::TraderPolymarketClient;
use portfolio::PortfolioTracker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(config::TraderConfig::default_config_path);
    info!(path = %config_path, "loading trader config");
    let raw_config = config::TraderConfig::load(&config_path)?;

    // Resolving secrets fails fast if a referenced env var is unset, even
    // though the venue client below doesn't carry credentials itself yet —
    // this is the operator's one chance to catch a misconfigured deploy
    // before watchers start polling.
    let (api_key, api_secret, api_passphrase) = raw_config.resolve_secrets()?;
    if api_key.is_none() || api_secret.is_none() || api_passphrase.is_none() {
        warn!("one or more Polymarket API credentials are unset; order placement will be rejected by the venue");
    }

    let config = Arc::new(raw_config.global_config());

    let client = Arc::new(TraderPolymarketClient::with_gamma(
        &raw_config.polymarket.data_api_url,
        &raw_config.polymarket.gamma_api_url,
        raw_config.polymarket.rate_limit_delay_ms,
    ));

    let db = Arc::new(TraderDb::open(&raw_config.database.path).await?);
    let ledger = Arc::new(ExposureLedger::new());
    let portfolio = Arc::new(PortfolioTracker::new(Arc::clone(&client)));

    let mut engine_instance = WalletEngine::new(
        Arc::clone(&db),
        Arc::clone(&client),
        Arc::clone(&ledger),
        Arc::clone(&portfolio),
        Arc::clone(&config),
    );

    engine_instance.seed_from_config(&raw_config.traders).await?;

    let report = engine::reconcile::reconcile_on_startup(
        &db,
        &client,
        &raw_config.account.wallet_address,
        &mut engine_instance,
    )
    .await?;
    if report.diverged {
        warn!(
            venue = report.venue_position_count,
            persisted = report.persisted_position_count,
            "starting in observe mode after reconciliation mismatch"
        );
    }

    engine_instance.restore_watchers().await?;
    engine_instance.start_portfolio_sync();

    let state = Arc::new(api::AppState {
        db,
        engine: Mutex::new(engine_instance),
        ledger,
        config,
        started_at: chrono::Utc::now(),
        api_key: raw_config.server.api_key.clone(),
    });

    let app = api::router(state);

    let bind_addr = format!("{}:{}", raw_config.server.host, raw_config.server.port);
    info!(addr = %bind_addr, "starting trader HTTP server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
