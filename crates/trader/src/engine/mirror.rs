//! The trade executor (C6): places mirror orders against the venue,
//! updates the exposure ledger, and retries transient failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::audit;
use crate::config::GlobalConfig;
use crate::db::TraderDb;
use crate::errors::VenueError;
use crate::ledger::ExposureLedger;
use crate::polymarket::{OrderType, TraderPolymarketClient};
use crate::portfolio::PortfolioTracker;
use crate::risk::decide::{decide, Decision, LedgerView, RejectReason};
use crate::risk::fidelity;
use crate::types::{FidelityOutcome, FillEvent, Side};

/// Quartic taker fee (Polymarket): fee = price * 0.25 * (price * (1 - price))^2
/// ONLY for crypto 15-min markets. All other markets: 0 fee.
pub fn quartic_taker_fee(price: f64) -> f64 {
    let p = price.clamp(0.0, 1.0);
    p * 0.25 * (p * (1.0 - p)).powi(2)
}

pub fn compute_taker_fee(price: f64, is_crypto_15m: bool) -> f64 {
    if is_crypto_15m {
        quartic_taker_fee(price)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    ExecutedBuy { shares: Decimal, price: Decimal, mirror_size_usd: Decimal },
    ExecutedSell { shares: Decimal, price: Decimal, proceeds: Decimal },
    Rejected { reason: String },
    /// SELL re-queued because no post-BUY snapshot exists yet.
    Deferred,
    /// Duplicate trade_id, or SELL with no mirror position.
    Noop,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
}

const RETRY_MAX_ATTEMPTS: u32 = 5;
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(30);

async fn retry_with_backoff<F, Fut, T>(mut attempt_fn: F) -> Result<T, VenueError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, VenueError>>,
{
    let mut delay = RETRY_BASE;
    let mut last_err = VenueError::Fatal("no attempts made".to_string());
    for attempt in 1..=RETRY_MAX_ATTEMPTS {
        match attempt_fn(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                last_err = e;
                if attempt < RETRY_MAX_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RETRY_CAP);
                }
            }
        }
    }
    Err(last_err)
}

/// Attempts to mirror one fill end to end: venue lookups, risk decision,
/// ledger reserve/commit/release, order placement with retry.
pub async fn execute(
    fill: &FillEvent,
    db: &Arc<TraderDb>,
    ledger: &Arc<ExposureLedger>,
    portfolio: &Arc<PortfolioTracker>,
    client: &Arc<TraderPolymarketClient>,
    config: &GlobalConfig,
) -> anyhow::Result<ExecutionResult> {
    if ledger.has_processed(&fill.trade_id).await {
        info!(trade_id = %fill.trade_id, "duplicate trade_id, skipping");
        return Ok(ExecutionResult { outcome: ExecutionOutcome::Noop });
    }

    let market = match client.fetch_market(&fill.market).await {
        Ok(m) => m,
        Err(e) => {
            warn!(market = %fill.market, error = %e, "failed to fetch market metadata");
            return Ok(ExecutionResult {
                outcome: ExecutionOutcome::Failed { error: e.to_string() },
            });
        }
    };

    let snapshot = portfolio.get(&fill.leader_wallet).await;
    let has_position = ledger.position_of(&fill.market, &fill.token_id).await.is_some();
    let sell_fraction = if fill.side == Side::Sell {
        portfolio.sell_fraction(&fill.leader_wallet, &fill.token_id).await
    } else {
        None
    };

    let ledger_view = LedgerView {
        leader_exposure: ledger.exposure_of(&fill.leader_wallet).await,
        global_exposure: ledger.global_exposure().await,
    };

    let decision = decide(fill, snapshot.as_ref(), &market, ledger_view, has_position, sell_fraction, config);

    let outcome = match decision {
        Decision::Reject(reason) => {
            ledger.mark_processed(&fill.trade_id).await;
            log_rejection(db, fill, reason).await;
            ExecutionOutcome::Rejected { reason: reason.to_string() }
        }
        Decision::NoopSell => {
            ledger.mark_processed(&fill.trade_id).await;
            ExecutionOutcome::Noop
        }
        Decision::DeferSell => ExecutionOutcome::Deferred,
        Decision::AcceptBuy { mirror_size_usd, shares } => {
            execute_buy(fill, db, ledger, client, &market, mirror_size_usd, shares, config.max_total_exposure).await
        }
        Decision::AcceptSell { sold_fraction } => {
            execute_sell(fill, db, ledger, client, &market, sold_fraction).await
        }
    };

    audit::record(db, fill, &outcome, &config.trade_tracking_output_dir).await?;
    Ok(ExecutionResult { outcome })
}

async fn log_rejection(db: &Arc<TraderDb>, fill: &FillEvent, reason: RejectReason) {
    let mapped = match reason {
        RejectReason::PortfolioTooSmall => FidelityOutcome::SkippedPortfolioRisk,
        RejectReason::LeaderExposureExceeded => FidelityOutcome::SkippedWalletRisk,
        RejectReason::GlobalExposureExceeded => FidelityOutcome::SkippedPortfolioRisk,
        RejectReason::CategoryBlacklisted
        | RejectReason::CategoryNotWhitelisted
        | RejectReason::LowLiquidity => FidelityOutcome::SkippedMarketClosed,
        RejectReason::BelowMinOrderSize => FidelityOutcome::SkippedNoFill,
    };
    let reason_str = reason.to_string();
    if let Err(e) = fidelity::log_fidelity(
        db,
        &fill.leader_wallet,
        &fill.market,
        &fill.trade_id,
        mapped,
        Some(&reason_str),
    )
    .await
    {
        warn!(error = %e, "failed to log fidelity for rejected fill");
    }
    info!(wallet = %fill.leader_wallet, trade_id = %fill.trade_id, reason = %reason_str, "mirror rejected");
}

fn round_tick(price: Decimal, tick: Decimal, round_up: bool) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    let units = price / tick;
    let rounded_units = if round_up { units.ceil() } else { units.floor() };
    rounded_units * tick
}

#[allow(clippy::too_many_arguments)]
async fn execute_buy(
    fill: &FillEvent,
    db: &Arc<TraderDb>,
    ledger: &Arc<ExposureLedger>,
    client: &Arc<TraderPolymarketClient>,
    market: &crate::types::MarketMeta,
    mirror_size_usd: Decimal,
    shares: Decimal,
    max_total_exposure: Decimal,
) -> ExecutionOutcome {
    let token = match ledger
        .reserve(&fill.leader_wallet, mirror_size_usd, fill.allocated_capital, max_total_exposure)
        .await
    {
        Ok(t) => t,
        Err(rejection) => {
            ledger.mark_processed(&fill.trade_id).await;
            return ExecutionOutcome::Rejected { reason: format!("{rejection:?}") };
        }
    };

    let price = round_tick(fill.price, market.tick_size, false);
    let order = retry_with_backoff(|attempt| {
        client.create_order(
            &fill.token_id,
            Side::Buy,
            shares,
            price,
            market.neg_risk,
            OrderType::Gtc,
            &fill.trade_id,
            attempt,
        )
    })
    .await;

    match order {
        Ok(_result) => {
            if let Err(e) = ledger
                .commit(token, &fill.trade_id, &fill.market, &fill.token_id, true, shares, price, Utc::now())
                .await
            {
                warn!(error = %e, "ledger commit failed after successful order");
            }
            if let Err(e) = fidelity::log_fidelity(
                db,
                &fill.leader_wallet,
                &fill.market,
                &fill.trade_id,
                FidelityOutcome::Copied,
                None,
            )
            .await
            {
                warn!(error = %e, "failed to log fidelity for executed buy");
            }
            info!(wallet = %fill.leader_wallet, market = %fill.market, shares = %shares, price = %price, "mirror buy executed");
            ExecutionOutcome::ExecutedBuy { shares, price, mirror_size_usd }
        }
        Err(e) => {
            ledger.release(token).await.ok();
            ledger.mark_processed(&fill.trade_id).await;
            warn!(error = %e, "mirror buy order failed");
            ExecutionOutcome::Failed { error: e.to_string() }
        }
    }
}

async fn execute_sell(
    fill: &FillEvent,
    db: &Arc<TraderDb>,
    ledger: &Arc<ExposureLedger>,
    client: &Arc<TraderPolymarketClient>,
    market: &crate::types::MarketMeta,
    sold_fraction: Decimal,
) -> ExecutionOutcome {
    let Some(position) = ledger.position_of(&fill.market, &fill.token_id).await else {
        ledger.mark_processed(&fill.trade_id).await;
        return ExecutionOutcome::Noop;
    };
    let shares = position.size * sold_fraction;
    if shares <= Decimal::ZERO {
        ledger.mark_processed(&fill.trade_id).await;
        return ExecutionOutcome::Noop;
    }

    let exit_price = client
        .fetch_midpoint(&fill.token_id)
        .await
        .ok()
        .flatten()
        .unwrap_or(fill.price);
    let price = round_tick(exit_price, market.tick_size, true);

    let order = retry_with_backoff(|attempt| {
        client.create_order(
            &fill.token_id,
            Side::Sell,
            shares,
            price,
            market.neg_risk,
            OrderType::Fok,
            &fill.trade_id,
            attempt,
        )
    })
    .await;

    match order {
        Ok(_result) => {
            let reduction = ledger
                .apply_reduction(&fill.market, &fill.token_id, sold_fraction, price, Utc::now())
                .await;
            ledger.mark_processed(&fill.trade_id).await;
            if let Err(e) = fidelity::log_fidelity(
                db,
                &fill.leader_wallet,
                &fill.market,
                &fill.trade_id,
                FidelityOutcome::Copied,
                None,
            )
            .await
            {
                warn!(error = %e, "failed to log fidelity for executed sell");
            }
            match reduction {
                Some(r) => ExecutionOutcome::ExecutedSell { shares: r.sold_shares, price, proceeds: r.proceeds },
                None => ExecutionOutcome::Noop,
            }
        }
        Err(e) => {
            ledger.mark_processed(&fill.trade_id).await;
            warn!(error = %e, "mirror sell order failed");
            ExecutionOutcome::Failed { error: e.to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quartic_taker_fee() {
        let fee = quartic_taker_fee(0.50);
        assert!((fee - 0.0078125).abs() < 1e-10);
        assert!(quartic_taker_fee(0.0).abs() < 1e-10);
        assert!(quartic_taker_fee(1.0).abs() < 1e-10);
    }

    #[test]
    fn test_compute_taker_fee_non_crypto_is_zero() {
        assert!((compute_taker_fee(0.50, false)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compute_taker_fee_crypto_is_positive() {
        assert!(compute_taker_fee(0.50, true) > 0.0);
    }

    #[test]
    fn test_round_tick_buy_rounds_down() {
        let price = round_tick(Decimal::new(567, 3), Decimal::new(1, 2), false);
        assert_eq!(price, Decimal::new(56, 2));
    }

    #[test]
    fn test_round_tick_sell_rounds_up() {
        let price = round_tick(Decimal::new(561, 3), Decimal::new(1, 2), true);
        assert_eq!(price, Decimal::new(57, 2));
    }
}
