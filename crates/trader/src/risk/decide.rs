//! The risk manager's pure decision function (C5): `(fill, portfolio,
//! ledger view, config) -> Decision`. Never suspends, never touches the
//! database — all state it needs is passed in by the caller.

use rust_decimal::Decimal;
use std::fmt;

use crate::config::GlobalConfig;
use crate::portfolio::PortfolioSnapshot;
use crate::types::{FillEvent, MarketMeta, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    PortfolioTooSmall,
    BelowMinOrderSize,
    CategoryBlacklisted,
    CategoryNotWhitelisted,
    LowLiquidity,
    LeaderExposureExceeded,
    GlobalExposureExceeded,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortfolioTooSmall => write!(f, "portfolio too small or unknown"),
            Self::BelowMinOrderSize => write!(f, "below min order size"),
            Self::CategoryBlacklisted => write!(f, "market category is blacklisted"),
            Self::CategoryNotWhitelisted => write!(f, "market category is not whitelisted"),
            Self::LowLiquidity => write!(f, "market liquidity below minimum"),
            Self::LeaderExposureExceeded => write!(f, "would exceed leader's allocated capital"),
            Self::GlobalExposureExceeded => write!(f, "would exceed global max total exposure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    AcceptBuy { mirror_size_usd: Decimal, shares: Decimal },
    AcceptSell { sold_fraction: Decimal },
    /// SELL with no corresponding mirror position: not a failure, just
    /// nothing to do.
    NoopSell,
    /// SELL that arrived before any post-BUY portfolio snapshot exists;
    /// caller should re-queue and retry on the next tick.
    DeferSell,
    Reject(RejectReason),
}

/// Current exposure as seen by the ledger, consulted but not mutated here.
#[derive(Debug, Clone, Copy)]
pub struct LedgerView {
    pub leader_exposure: Decimal,
    pub global_exposure: Decimal,
}

#[allow(clippy::too_many_arguments)]
pub fn decide(
    fill: &FillEvent,
    snapshot: Option<&PortfolioSnapshot>,
    market: &MarketMeta,
    ledger: LedgerView,
    has_mirror_position: bool,
    sell_fraction: Option<Decimal>,
    config: &GlobalConfig,
) -> Decision {
    match fill.side {
        Side::Sell => decide_sell(has_mirror_position, sell_fraction),
        Side::Buy => decide_buy(fill, snapshot, market, ledger, config),
    }
}

fn decide_sell(has_mirror_position: bool, sell_fraction: Option<Decimal>) -> Decision {
    if !has_mirror_position {
        return Decision::NoopSell;
    }
    match sell_fraction {
        Some(fraction) => Decision::AcceptSell { sold_fraction: fraction },
        None => Decision::DeferSell,
    }
}

fn decide_buy(
    fill: &FillEvent,
    snapshot: Option<&PortfolioSnapshot>,
    market: &MarketMeta,
    ledger: LedgerView,
    config: &GlobalConfig,
) -> Decision {
    let Some(snapshot) = snapshot else {
        return Decision::Reject(RejectReason::PortfolioTooSmall);
    };
    if snapshot.total_value < config.min_portfolio_value {
        return Decision::Reject(RejectReason::PortfolioTooSmall);
    }

    let mut position_pct = fill.notional() / snapshot.total_value;
    if !config.use_portfolio_proportion {
        position_pct = Decimal::ONE;
    }

    let effective_allocation = fill.allocated_capital * snapshot.deployment_rate;
    let raw_mirror = effective_allocation * position_pct;
    let cap_by_position_pct = Decimal::try_from(config.max_position_pct)
        .unwrap_or(Decimal::ONE)
        * fill.allocated_capital;
    let mirror_size_usd = raw_mirror.min(config.max_single_bet).min(cap_by_position_pct);

    if fill.price <= Decimal::ZERO {
        return Decision::Reject(RejectReason::BelowMinOrderSize);
    }
    let shares = mirror_size_usd / fill.price;
    if shares < market.min_order_size {
        return Decision::Reject(RejectReason::BelowMinOrderSize);
    }

    if let Some(category) = &market.category {
        if config.blacklist_categories.contains(category) {
            return Decision::Reject(RejectReason::CategoryBlacklisted);
        }
        if !config.whitelist_categories.is_empty() && !config.whitelist_categories.contains(category) {
            return Decision::Reject(RejectReason::CategoryNotWhitelisted);
        }
    } else if !config.whitelist_categories.is_empty() {
        return Decision::Reject(RejectReason::CategoryNotWhitelisted);
    }

    if market.liquidity < config.min_liquidity {
        return Decision::Reject(RejectReason::LowLiquidity);
    }

    if mirror_size_usd + ledger.leader_exposure > fill.allocated_capital {
        return Decision::Reject(RejectReason::LeaderExposureExceeded);
    }
    if mirror_size_usd + ledger.global_exposure > config.max_total_exposure {
        return Decision::Reject(RejectReason::GlobalExposureExceeded);
    }

    Decision::AcceptBuy { mirror_size_usd, shares }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    fn config() -> GlobalConfig {
        GlobalConfig {
            total_capital: dec!(5000),
            reserve_capital: dec!(0),
            max_total_exposure: dec!(5000),
            max_single_bet: dec!(1000),
            min_portfolio_value: dec!(100),
            max_position_pct: 0.5,
            use_portfolio_proportion: true,
            min_liquidity: dec!(0),
            whitelist_categories: HashSet::new(),
            blacklist_categories: HashSet::new(),
            poll_interval: std::time::Duration::from_secs(5),
            portfolio_sync_interval: std::time::Duration::from_secs(60),
            trade_tracking_output_dir: "state/trader_trades".to_string(),
        }
    }

    fn snapshot(total_value: Decimal, deployment_rate: Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot {
            total_value,
            deployed: total_value * deployment_rate,
            cash_reserve: total_value * (Decimal::ONE - deployment_rate),
            deployment_rate,
            position_count: 1,
            fetched_at: Utc::now(),
            positions_by_token: Default::default(),
        }
    }

    fn market() -> MarketMeta {
        MarketMeta {
            condition_id: "m1".into(),
            neg_risk: false,
            tick_size: dec!(0.01),
            min_order_size: dec!(1),
            liquidity: dec!(10000),
            category: Some("politics".into()),
        }
    }

    fn fill(size: Decimal, price: Decimal) -> FillEvent {
        FillEvent {
            leader_wallet: "0xA".into(),
            leader_name: "A".into(),
            allocated_capital: dec!(2000),
            market: "m1".into(),
            token_id: "tok1".into(),
            side: Side::Buy,
            size,
            price,
            timestamp: 0,
            trade_id: "t1".into(),
        }
    }

    #[test]
    fn test_s1_proportional_buy() {
        let snap = snapshot(dec!(10000), Decimal::ONE);
        let f = fill(dec!(100), dec!(0.5));
        let ledger = LedgerView { leader_exposure: dec!(0), global_exposure: dec!(0) };
        let decision = decide(&f, Some(&snap), &market(), ledger, false, None, &config());
        assert_eq!(
            decision,
            Decision::AcceptBuy { mirror_size_usd: dec!(10), shares: dec!(20) }
        );
    }

    #[test]
    fn test_s2_risk_cap_enforcement() {
        let snap = snapshot(dec!(10000), Decimal::ONE);
        let f = fill(dec!(20000), dec!(0.5));
        let ledger = LedgerView { leader_exposure: dec!(10), global_exposure: dec!(10) };
        let decision = decide(&f, Some(&snap), &market(), ledger, false, None, &config());
        // raw_mirror = 2000 * 1.0 = 2000, capped by max_position_pct(0.5*2000=1000)
        assert_eq!(
            decision,
            Decision::AcceptBuy { mirror_size_usd: dec!(1000), shares: dec!(2000) }
        );
    }

    #[test]
    fn test_empty_portfolio_rejected() {
        let f = fill(dec!(100), dec!(0.5));
        let ledger = LedgerView { leader_exposure: dec!(0), global_exposure: dec!(0) };
        let decision = decide(&f, None, &market(), ledger, false, None, &config());
        assert_eq!(decision, Decision::Reject(RejectReason::PortfolioTooSmall));
    }

    #[test]
    fn test_zero_deployment_rate_rejects_below_minimum() {
        let snap = snapshot(dec!(10000), Decimal::ZERO);
        let f = fill(dec!(100), dec!(0.5));
        let ledger = LedgerView { leader_exposure: dec!(0), global_exposure: dec!(0) };
        let decision = decide(&f, Some(&snap), &market(), ledger, false, None, &config());
        assert_eq!(decision, Decision::Reject(RejectReason::BelowMinOrderSize));
    }

    #[test]
    fn test_global_exposure_at_cap_rejects_next() {
        let snap = snapshot(dec!(10000), Decimal::ONE);
        let f = fill(dec!(100), dec!(0.5));
        let mut cfg = config();
        cfg.max_total_exposure = dec!(10);
        let ledger = LedgerView { leader_exposure: dec!(0), global_exposure: dec!(10) };
        let decision = decide(&f, Some(&snap), &market(), ledger, false, None, &cfg);
        assert_eq!(decision, Decision::Reject(RejectReason::GlobalExposureExceeded));
    }

    #[test]
    fn test_blacklisted_category_rejected() {
        let snap = snapshot(dec!(10000), Decimal::ONE);
        let f = fill(dec!(100), dec!(0.5));
        let mut cfg = config();
        cfg.blacklist_categories.insert("politics".to_string());
        let ledger = LedgerView { leader_exposure: dec!(0), global_exposure: dec!(0) };
        let decision = decide(&f, Some(&snap), &market(), ledger, false, None, &cfg);
        assert_eq!(decision, Decision::Reject(RejectReason::CategoryBlacklisted));
    }

    #[test]
    fn test_sell_with_no_position_is_noop() {
        let mut f = fill(dec!(50), dec!(0.5));
        f.side = Side::Sell;
        let ledger = LedgerView { leader_exposure: dec!(0), global_exposure: dec!(0) };
        let decision = decide(&f, None, &market(), ledger, false, None, &config());
        assert_eq!(decision, Decision::NoopSell);
    }

    #[test]
    fn test_sell_without_snapshot_defers() {
        let mut f = fill(dec!(50), dec!(0.5));
        f.side = Side::Sell;
        let ledger = LedgerView { leader_exposure: dec!(0), global_exposure: dec!(0) };
        let decision = decide(&f, None, &market(), ledger, true, None, &config());
        assert_eq!(decision, Decision::DeferSell);
    }

    #[test]
    fn test_sell_reduces_by_fraction() {
        let mut f = fill(dec!(50), dec!(0.5));
        f.side = Side::Sell;
        let ledger = LedgerView { leader_exposure: dec!(0), global_exposure: dec!(0) };
        let decision = decide(&f, None, &market(), ledger, true, Some(dec!(0.5)), &config());
        assert_eq!(decision, Decision::AcceptSell { sold_fraction: dec!(0.5) });
    }

    #[test]
    fn test_mirror_size_exactly_max_single_bet_accepted() {
        let snap = snapshot(dec!(2000), Decimal::ONE);
        let f = fill(dec!(2000), dec!(0.5)); // notional 1000, 50% of portfolio
        let mut cfg = config();
        cfg.max_single_bet = dec!(1000);
        let ledger = LedgerView { leader_exposure: dec!(0), global_exposure: dec!(0) };
        let decision = decide(&f, Some(&snap), &market(), ledger, false, None, &cfg);
        assert_eq!(
            decision,
            Decision::AcceptBuy { mirror_size_usd: dec!(1000), shares: dec!(2000) }
        );
    }
}
