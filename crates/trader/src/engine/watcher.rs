use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GlobalConfig;
use crate::db::TraderDb;
use crate::engine::detector::TradeDetector;
use crate::engine::{mirror, FollowedWallet};
use crate::ledger::ExposureLedger;
use crate::polymarket::{self, RawTrade, TraderPolymarketClient};
use crate::portfolio::PortfolioTracker;
use crate::types::{FillEvent, Side};

/// Runs the fast poll loop for a single leader wallet: fetches recent
/// trades, detects new ones, enriches them into `FillEvent`s, and hands
/// each to the executor.
#[allow(clippy::too_many_arguments)]
pub async fn run_watcher(
    db: Arc<TraderDb>,
    client: Arc<TraderPolymarketClient>,
    ledger: Arc<ExposureLedger>,
    portfolio: Arc<PortfolioTracker>,
    config: Arc<GlobalConfig>,
    wallet: FollowedWallet,
    halted: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let addr = wallet.proxy_wallet.clone();
    let poll_interval = config.poll_interval;
    // Overlap window >= 2x poll interval absorbs clock skew and
    // out-of-order arrivals (spec §4.3) rather than trusting offset paging.
    let overlap_window_secs = (poll_interval.as_secs() as i64) * 2;

    info!(wallet = %addr, leader = %wallet.name, "watcher started");

    let mut detector = TradeDetector::new(wallet.last_trade_seen_hash.clone());
    let mut interval = tokio::time::interval(poll_interval);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(wallet = %addr, "watcher cancelled");
                break;
            }
            _ = interval.tick() => {
                if halted.load(Ordering::SeqCst) {
                    debug!(wallet = %addr, "skipping poll — trading halted");
                    continue;
                }

                let status = load_wallet_status(&db, &addr).await;
                match status.as_deref() {
                    Some("paused") => {
                        debug!(wallet = %addr, "skipping poll — wallet paused");
                        continue;
                    }
                    Some("killed") | Some("removed") => {
                        info!(wallet = %addr, status = status.as_deref().unwrap_or(""), "wallet no longer active, stopping watcher");
                        break;
                    }
                    _ => {}
                }

                let since = detector.last_timestamp().map_or(0, |ts| (ts - overlap_window_secs).max(0));

                match client.fetch_trades(&addr, since, 200).await {
                    Ok(trades) => {
                        let new_trades = detector.detect_new(&trades);
                        if !new_trades.is_empty() {
                            info!(wallet = %addr, new_count = new_trades.len(), "detected new trades");

                            if let Some(last) = new_trades.last() {
                                let hash = TraderPolymarketClient::trade_hash(last);
                                let ts = last.timestamp.map(|t| {
                                    chrono::DateTime::from_timestamp(t, 0)
                                        .map(|dt| dt.to_rfc3339())
                                        .unwrap_or_default()
                                });
                                update_watermark(&db, &addr, &hash, ts.as_deref()).await;
                            }

                            for trade in &new_trades {
                                let hash = TraderPolymarketClient::trade_hash(trade);
                                log_trade_event(&db, &addr, trade).await;
                                match enrich(&wallet, trade) {
                                    Some(fill) => {
                                        match mirror::execute(&fill, &db, &ledger, &portfolio, &client, &config).await {
                                            Ok(result) => {
                                                if result.outcome != mirror::ExecutionOutcome::Deferred {
                                                    detector.mark_delivered(&hash);
                                                }
                                            }
                                            Err(e) => {
                                                error!(wallet = %addr, trade_id = %fill.trade_id, error = %e, "mirror execution failed, will retry next poll");
                                            }
                                        }
                                    }
                                    None => {
                                        warn!(wallet = %addr, "skipping malformed trade: missing condition_id/asset/side");
                                        detector.mark_delivered(&hash);
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(wallet = %addr, error = %e, "failed to fetch trades");
                    }
                }
            }
        }
    }

    info!(wallet = %addr, "watcher stopped");
}

fn enrich(wallet: &FollowedWallet, trade: &RawTrade) -> Option<FillEvent> {
    let market = trade.condition_id.clone()?;
    let token_id = trade.asset.clone()?;
    let side = Side::from_str_loose(trade.side.as_deref()?)?;

    Some(FillEvent {
        leader_wallet: wallet.proxy_wallet.clone(),
        leader_name: wallet.name.clone(),
        allocated_capital: wallet.allocated_capital,
        market,
        token_id,
        side,
        size: polymarket::parse_decimal_or(&trade.size, Decimal::ZERO),
        price: polymarket::parse_decimal_or(&trade.price, Decimal::ZERO),
        timestamp: trade.timestamp.unwrap_or(0),
        trade_id: TraderPolymarketClient::trade_hash(trade),
    })
}

async fn load_wallet_status(db: &TraderDb, wallet: &str) -> Option<String> {
    let addr = wallet.to_string();
    db.call(move |conn| {
        conn.query_row(
            "SELECT status FROM followed_wallets WHERE proxy_wallet = ?1",
            [addr],
            |row| row.get(0),
        )
    })
    .await
    .ok()
}

async fn update_watermark(db: &TraderDb, wallet: &str, hash: &str, timestamp: Option<&str>) {
    let addr = wallet.to_string();
    let h = hash.to_string();
    let ts = timestamp.map(std::string::ToString::to_string);
    let now = chrono::Utc::now().to_rfc3339();

    if let Err(e) = db
        .call(move |conn| {
            conn.execute(
                "UPDATE followed_wallets SET last_trade_seen_hash = ?1, last_trade_seen_at = ?2, updated_at = ?3 WHERE proxy_wallet = ?4",
                rusqlite::params![h, ts, now, addr],
            )?;
            Ok(())
        })
        .await
    {
        error!(wallet = wallet, error = %e, "failed to update watermark");
    }
}

async fn log_trade_event(db: &TraderDb, wallet: &str, trade: &RawTrade) {
    let addr = wallet.to_string();
    let details = serde_json::json!({
        "condition_id": trade.condition_id,
        "side": trade.side,
        "size": trade.size,
        "price": trade.price,
        "timestamp": trade.timestamp,
    })
    .to_string();
    let now = chrono::Utc::now().to_rfc3339();

    if let Err(e) = db
        .call(move |conn| {
            conn.execute(
                "INSERT INTO trade_events (event_type, proxy_wallet, details_json, created_at)
                 VALUES ('trade_detected', ?1, ?2, ?3)",
                rusqlite::params![addr, details, now],
            )?;
            Ok(())
        })
        .await
    {
        error!(wallet = wallet, error = %e, "failed to log trade event");
    }
}
