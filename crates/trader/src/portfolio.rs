//! The portfolio tracker (C2): per-leader snapshot of positions, deployed
//! capital, and deployment rate, refreshed on a timer by the orchestrator's
//! slow loop.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::errors::VenueError;
use crate::polymarket::TraderPolymarketClient;
use crate::types::Position;

#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub total_value: Decimal,
    pub deployed: Decimal,
    pub cash_reserve: Decimal,
    pub deployment_rate: Decimal,
    pub position_count: usize,
    pub fetched_at: DateTime<Utc>,
    /// Leader's share count per token, retained so the SELL path can derive
    /// the fraction sold between two snapshots.
    pub positions_by_token: HashMap<String, Decimal>,
}

impl PortfolioSnapshot {
    fn zero(now: DateTime<Utc>) -> Self {
        Self {
            total_value: Decimal::ZERO,
            deployed: Decimal::ZERO,
            cash_reserve: Decimal::ZERO,
            deployment_rate: Decimal::ZERO,
            position_count: 0,
            fetched_at: now,
            positions_by_token: HashMap::new(),
        }
    }

    fn from_positions(positions: &[Position], now: DateTime<Utc>) -> Self {
        let deployed: Decimal = positions.iter().map(|p| p.current_value).sum();
        let initial: Decimal = positions.iter().map(|p| p.initial_value).sum();
        // deployed reflects mark-to-market; fall back to initial only when
        // no marks exist at all.
        let total_value = if deployed > Decimal::ZERO { deployed } else { initial };
        let deployment_rate = if total_value > Decimal::ZERO {
            (deployed / total_value).min(Decimal::ONE)
        } else {
            Decimal::ZERO
        };

        let mut positions_by_token = HashMap::new();
        for p in positions {
            *positions_by_token.entry(p.asset.clone()).or_insert(Decimal::ZERO) += p.size;
        }

        Self {
            total_value,
            deployed,
            cash_reserve: total_value - deployed,
            deployment_rate,
            position_count: positions.len(),
            fetched_at: now,
            positions_by_token,
        }
    }
}

pub struct PortfolioTracker {
    client: Arc<TraderPolymarketClient>,
    current: RwLock<HashMap<String, PortfolioSnapshot>>,
    previous: RwLock<HashMap<String, PortfolioSnapshot>>,
}

impl PortfolioTracker {
    pub fn new(client: Arc<TraderPolymarketClient>) -> Self {
        Self {
            client,
            current: RwLock::new(HashMap::new()),
            previous: RwLock::new(HashMap::new()),
        }
    }

    /// Fetches open positions above the dust threshold, computes the
    /// snapshot, and atomically swaps it in. Network failure leaves the
    /// prior snapshot in place and surfaces a `Transient` error.
    pub async fn sync(&self, wallet: &str) -> Result<PortfolioSnapshot, VenueError> {
        let positions = self.client.fetch_positions(wallet).await?;
        let now = Utc::now();
        let snapshot = PortfolioSnapshot::from_positions(&positions, now);

        let mut current = self.current.write().await;
        let mut previous = self.previous.write().await;
        if let Some(prior) = current.remove(wallet) {
            previous.insert(wallet.to_string(), prior);
        }
        current.insert(wallet.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    pub async fn get(&self, wallet: &str) -> Option<PortfolioSnapshot> {
        self.current.read().await.get(wallet).cloned()
    }

    /// `trade_size_usd / total_value`, or 0 if the portfolio is unknown or
    /// has zero value.
    pub async fn position_fraction(&self, wallet: &str, trade_size_usd: Decimal) -> Decimal {
        match self.get(wallet).await {
            Some(snapshot) if snapshot.total_value > Decimal::ZERO => {
                trade_size_usd / snapshot.total_value
            }
            _ => Decimal::ZERO,
        }
    }

    /// `allocated_capital * deployment_rate`, clamped to `[0, allocated_capital]`,
    /// alongside the deployment rate used.
    pub async fn effective_allocation(
        &self,
        wallet: &str,
        allocated_capital: Decimal,
    ) -> (Decimal, Decimal) {
        let deployment_rate = self
            .get(wallet)
            .await
            .map(|s| s.deployment_rate)
            .unwrap_or(Decimal::ZERO);
        let raw = allocated_capital * deployment_rate;
        let clamped = raw.clamp(Decimal::ZERO, allocated_capital);
        (clamped, deployment_rate)
    }

    /// Fraction of the leader's position in `token_id` sold between the
    /// previous and current snapshot. `None` when there is no previous
    /// snapshot recording that token — the caller should defer the SELL one
    /// tick rather than treat it as a full exit (spec Open Question 3).
    pub async fn sell_fraction(&self, wallet: &str, token_id: &str) -> Option<Decimal> {
        let current = self.current.read().await;
        let previous = self.previous.read().await;

        let prev_size = *previous.get(wallet)?.positions_by_token.get(token_id)?;
        if prev_size <= Decimal::ZERO {
            return None;
        }
        let current_size = current
            .get(wallet)
            .and_then(|s| s.positions_by_token.get(token_id).copied())
            .unwrap_or(Decimal::ZERO);

        Some(((prev_size - current_size) / prev_size).clamp(Decimal::ZERO, Decimal::ONE))
    }

    #[cfg(test)]
    async fn seed(&self, wallet: &str, snapshot: PortfolioSnapshot) {
        self.current.write().await.insert(wallet.to_string(), snapshot);
    }

    #[cfg(test)]
    async fn seed_previous(&self, wallet: &str, snapshot: PortfolioSnapshot) {
        self.previous.write().await.insert(wallet.to_string(), snapshot);
    }
}


impl PartialEq for PortfolioSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.total_value == other.total_value
            && self.deployed == other.deployed
            && self.cash_reserve == other.cash_reserve
            && self.deployment_rate == other.deployment_rate
            && self.position_count == other.position_count
    }
}
