//! Startup reconciliation (spec.md §9): compares venue-reported open
//! positions for the operator's own wallet against what survived in
//! `trader_positions`. A mismatch beyond a small threshold means state
//! drifted while the process was down — a fill was missed, or an order
//! placed just before a crash landed with unknown status — and the engine
//! must not resume live trading blind to that gap.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use super::WalletEngine;
use crate::db::TraderDb;
use crate::polymarket::TraderPolymarketClient;

/// Absolute difference in open-position counts tolerated before the engine
/// refuses to resume live trading.
fn divergence_threshold() -> usize {
    2
}

fn is_diverged(venue_count: usize, persisted_count: usize) -> bool {
    venue_count.abs_diff(persisted_count) > divergence_threshold()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub venue_position_count: usize,
    pub persisted_position_count: usize,
    pub diverged: bool,
}

/// Fetches the operator's own open positions from the venue and compares
/// the count against `trader_positions`. On divergence beyond
/// [`divergence_threshold`], halts the engine into a read-only "observe"
/// mode and logs the discrepancy rather than attempting to auto-correct it.
/// A venue that can't be reached at startup is not treated as divergence —
/// there is nothing to compare against, so the engine starts normally and
/// the first portfolio sync will surface any real problem.
pub async fn reconcile_on_startup(
    db: &Arc<TraderDb>,
    client: &Arc<TraderPolymarketClient>,
    wallet_address: &str,
    engine: &mut WalletEngine,
) -> Result<ReconcileReport> {
    let venue_count = match client.fetch_positions(wallet_address).await {
        Ok(positions) => positions.len(),
        Err(e) => {
            warn!(error = %e, "reconciliation could not reach venue at startup, skipping");
            return Ok(ReconcileReport {
                venue_position_count: 0,
                persisted_position_count: 0,
                diverged: false,
            });
        }
    };

    let persisted_count: i64 = db
        .call(|conn| conn.query_row("SELECT COUNT(*) FROM trader_positions", [], |row| row.get(0)))
        .await
        .context("failed to load persisted position count for reconciliation")?;
    let persisted_count = persisted_count as usize;

    let diverged = is_diverged(venue_count, persisted_count);
    if diverged {
        error!(
            venue = venue_count,
            persisted = persisted_count,
            "position count diverged beyond threshold on restart, entering observe mode"
        );
        engine.halt_all();
    } else {
        info!(venue = venue_count, persisted = persisted_count, "reconciliation OK");
    }

    Ok(ReconcileReport {
        venue_position_count: venue_count,
        persisted_position_count: persisted_count,
        diverged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraderConfig;
    use crate::ledger::ExposureLedger;
    use crate::portfolio::PortfolioTracker;

    fn test_config() -> Arc<crate::config::GlobalConfig> {
        let content = std::fs::read_to_string("config/trader.toml").unwrap();
        let config = TraderConfig::from_str(&content).unwrap();
        Arc::new(config.global_config())
    }

    #[test]
    fn test_is_diverged_within_threshold() {
        assert!(!is_diverged(5, 4));
        assert!(!is_diverged(5, 7));
    }

    #[test]
    fn test_is_diverged_beyond_threshold() {
        assert!(is_diverged(10, 2));
        assert!(is_diverged(0, 5));
    }

    #[tokio::test]
    async fn test_reconcile_skips_when_venue_unreachable() {
        let db = Arc::new(TraderDb::open_memory().await.unwrap());
        let client = Arc::new(TraderPolymarketClient::new(
            "http://127.0.0.1:1",
            0,
        ));
        let ledger = Arc::new(ExposureLedger::new());
        let portfolio = Arc::new(PortfolioTracker::new(Arc::clone(&client)));
        let mut engine = WalletEngine::new(
            Arc::clone(&db),
            Arc::clone(&client),
            ledger,
            portfolio,
            test_config(),
        );

        let report = reconcile_on_startup(&db, &client, "0xoperator", &mut engine)
            .await
            .unwrap();
        assert!(!report.diverged);
        assert!(!engine.is_halted());
    }
}
