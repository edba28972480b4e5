//! The exposure ledger (C4): the single authoritative record of mirrored
//! positions and per-leader/global exposure. All mutation goes through
//! `reserve`/`commit`/`release`/`apply_reduction`; nothing else touches the
//! fields directly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::errors::LedgerError;

/// Position size below which a mirrored position is treated as closed.
pub fn dust_threshold() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

pub type ReservationToken = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPosition {
    pub market: String,
    pub token_id: String,
    pub size: Decimal,
    pub avg_entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// leader wallet -> notional currently contributed to this position.
    pub contributing_leaders: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRejection {
    LeaderExposure,
    GlobalExposure,
}

struct PendingReservation {
    leader: String,
    amount: Decimal,
}

#[derive(Default)]
struct LedgerInner {
    mirror_positions: HashMap<(String, String), MirrorPosition>,
    per_leader_exposure: HashMap<String, Decimal>,
    processed_fills: HashSet<String>,
    processed_order: VecDeque<String>,
    pending: HashMap<ReservationToken, PendingReservation>,
}

impl LedgerInner {
    fn global_exposure(&self) -> Decimal {
        self.per_leader_exposure.values().copied().sum()
    }

    fn pending_for(&self, leader: &str) -> Decimal {
        self.pending
            .values()
            .filter(|p| p.leader == leader)
            .map(|p| p.amount)
            .sum()
    }

    fn pending_total(&self) -> Decimal {
        self.pending.values().map(|p| p.amount).sum()
    }
}

pub struct ExposureLedger {
    inner: Mutex<LedgerInner>,
    next_token: AtomicU64,
    max_processed: usize,
}

impl ExposureLedger {
    pub fn new() -> Self {
        Self::with_processed_bound(10_000)
    }

    pub fn with_processed_bound(max_processed: usize) -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
            next_token: AtomicU64::new(1),
            max_processed,
        }
    }

    pub async fn has_processed(&self, trade_id: &str) -> bool {
        self.inner.lock().await.processed_fills.contains(trade_id)
    }

    /// Marks a fill processed without reserving exposure — used for
    /// rejections and no-op SELLs, which still must never fire twice.
    pub async fn mark_processed(&self, trade_id: &str) {
        let mut inner = self.inner.lock().await;
        Self::record_processed(&mut inner, trade_id, self.max_processed);
    }

    fn record_processed(inner: &mut LedgerInner, trade_id: &str, bound: usize) {
        if inner.processed_fills.insert(trade_id.to_string()) {
            inner.processed_order.push_back(trade_id.to_string());
            while inner.processed_order.len() > bound {
                if let Some(oldest) = inner.processed_order.pop_front() {
                    inner.processed_fills.remove(&oldest);
                }
            }
        }
    }

    /// Pre-commit admission check. Atomic with respect to other reserves:
    /// the whole ledger is locked for the duration of the check.
    pub async fn reserve(
        &self,
        leader: &str,
        amount: Decimal,
        allocated_capital: Decimal,
        max_total_exposure: Decimal,
    ) -> Result<ReservationToken, LedgerRejection> {
        let mut inner = self.inner.lock().await;

        let leader_exposure = inner.per_leader_exposure.get(leader).copied().unwrap_or_default()
            + inner.pending_for(leader);
        if leader_exposure + amount > allocated_capital {
            return Err(LedgerRejection::LeaderExposure);
        }

        let global_exposure = inner.global_exposure() + inner.pending_total();
        if global_exposure + amount > max_total_exposure {
            return Err(LedgerRejection::GlobalExposure);
        }

        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        inner.pending.insert(
            token,
            PendingReservation {
                leader: leader.to_string(),
                amount,
            },
        );
        Ok(token)
    }

    /// Finalizes a reservation: moves the reserved amount into permanent
    /// exposure, updates the mirror position, and marks the fill processed.
    pub async fn commit(
        &self,
        token: ReservationToken,
        trade_id: &str,
        market: &str,
        token_id: &str,
        side_is_buy: bool,
        shares: Decimal,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        let pending = inner
            .pending
            .remove(&token)
            .ok_or(LedgerError::CommitWithoutReserve(token))?;

        if inner.processed_fills.contains(trade_id) {
            return Err(LedgerError::AlreadyProcessed(trade_id.to_string()));
        }

        *inner.per_leader_exposure.entry(pending.leader.clone()).or_default() += pending.amount;

        let key = (market.to_string(), token_id.to_string());
        let entry = inner.mirror_positions.entry(key).or_insert_with(|| MirrorPosition {
            market: market.to_string(),
            token_id: token_id.to_string(),
            size: Decimal::ZERO,
            avg_entry_price: price,
            opened_at: now,
            last_updated_at: now,
            contributing_leaders: HashMap::new(),
        });

        if side_is_buy {
            let new_size = entry.size + shares;
            entry.avg_entry_price =
                (entry.avg_entry_price * entry.size + price * shares) / new_size;
            entry.size = new_size;
            *entry.contributing_leaders.entry(pending.leader).or_default() += pending.amount;
        }
        entry.last_updated_at = now;

        let bound = self.max_processed;
        Self::record_processed(&mut inner, trade_id, bound);
        Ok(())
    }

    /// Rolls back a reservation that was never committed, e.g. because the
    /// venue rejected the order.
    pub async fn release(&self, token: ReservationToken) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        inner
            .pending
            .remove(&token)
            .map(|_| ())
            .ok_or(LedgerError::UnknownToken(token))
    }

    /// Reduces a mirror position by `sold_fraction` of its current size
    /// (fraction the leader sold of their own position), decrementing
    /// per-leader exposure proportional to each contributor's share.
    /// Returns the realized proceeds and the contributing leaders charged.
    pub async fn apply_reduction(
        &self,
        market: &str,
        token_id: &str,
        sold_fraction: Decimal,
        exit_price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<ReductionResult> {
        let mut inner = self.inner.lock().await;
        let key = (market.to_string(), token_id.to_string());
        let sold_fraction = sold_fraction.clamp(Decimal::ZERO, Decimal::ONE);

        let (sold_shares, proceeds, charges, remove_key) = {
            let position = inner.mirror_positions.get_mut(&key)?;
            let sold_shares = position.size * sold_fraction;
            let proceeds = sold_shares * exit_price;

            let mut charges = Vec::new();
            for (leader, contributed) in position.contributing_leaders.iter_mut() {
                let charge = *contributed * sold_fraction;
                *contributed -= charge;
                charges.push((leader.clone(), charge));
            }
            position.contributing_leaders.retain(|_, v| *v > Decimal::ZERO);
            position.size -= sold_shares;
            position.last_updated_at = now;

            let remove_key = position.size < dust_threshold();
            (sold_shares, proceeds, charges, remove_key)
        };

        for (leader, charge) in &charges {
            if let Some(exposure) = inner.per_leader_exposure.get_mut(leader) {
                *exposure -= *charge;
                if *exposure < Decimal::ZERO {
                    *exposure = Decimal::ZERO;
                }
            }
        }

        if remove_key {
            inner.mirror_positions.remove(&key);
        }

        Some(ReductionResult {
            sold_shares,
            proceeds,
            leaders_charged: charges,
        })
    }

    pub async fn exposure_of(&self, leader: &str) -> Decimal {
        self.inner
            .lock()
            .await
            .per_leader_exposure
            .get(leader)
            .copied()
            .unwrap_or_default()
    }

    pub async fn global_exposure(&self) -> Decimal {
        self.inner.lock().await.global_exposure()
    }

    pub async fn position_of(&self, market: &str, token_id: &str) -> Option<MirrorPosition> {
        self.inner
            .lock()
            .await
            .mirror_positions
            .get(&(market.to_string(), token_id.to_string()))
            .cloned()
    }

    pub async fn open_position_count(&self) -> usize {
        self.inner.lock().await.mirror_positions.len()
    }

    pub async fn per_leader_exposure(&self) -> HashMap<String, Decimal> {
        self.inner.lock().await.per_leader_exposure.clone()
    }
}

impl Default for ExposureLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ReductionResult {
    pub sold_shares: Decimal,
    pub proceeds: Decimal,
    pub leaders_charged: Vec<(String, Decimal)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_reserve_commit_updates_exposure() {
        let ledger = ExposureLedger::new();
        let token = ledger
            .reserve("A", dec!(10), dec!(2000), dec!(5000))
            .await
            .unwrap();
        ledger
            .commit(token, "t1", "m1", "tok1", true, dec!(20), dec!(0.5), now())
            .await
            .unwrap();
        assert_eq!(ledger.exposure_of("A").await, dec!(10));
        assert_eq!(ledger.global_exposure().await, dec!(10));
        assert!(ledger.has_processed("t1").await);
    }

    #[tokio::test]
    async fn test_reserve_rejects_over_leader_allocation() {
        let ledger = ExposureLedger::new();
        let result = ledger.reserve("A", dec!(2001), dec!(2000), dec!(5000)).await;
        assert_eq!(result, Err(LedgerRejection::LeaderExposure));
    }

    #[tokio::test]
    async fn test_reserve_rejects_over_global_cap() {
        let ledger = ExposureLedger::new();
        let t1 = ledger.reserve("A", dec!(3000), dec!(5000), dec!(5000)).await.unwrap();
        ledger.commit(t1, "t1", "m1", "tok1", true, dec!(1), dec!(1), now()).await.unwrap();
        let result = ledger.reserve("B", dec!(2001), dec!(5000), dec!(5000)).await;
        assert_eq!(result, Err(LedgerRejection::GlobalExposure));
    }

    #[tokio::test]
    async fn test_release_restores_prior_state() {
        let ledger = ExposureLedger::new();
        let before = ledger.global_exposure().await;
        let token = ledger.reserve("A", dec!(500), dec!(2000), dec!(5000)).await.unwrap();
        ledger.release(token).await.unwrap();
        assert_eq!(ledger.global_exposure().await, before);
        assert_eq!(ledger.exposure_of("A").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_commit_without_reserve_is_ledger_error() {
        let ledger = ExposureLedger::new();
        let result = ledger.commit(999, "t1", "m1", "tok1", true, dec!(1), dec!(1), now()).await;
        assert_eq!(result, Err(LedgerError::CommitWithoutReserve(999)));
    }

    #[tokio::test]
    async fn test_apply_reduction_halves_position_and_exposure() {
        let ledger = ExposureLedger::new();
        let token = ledger.reserve("A", dec!(10), dec!(2000), dec!(5000)).await.unwrap();
        ledger
            .commit(token, "t1", "m1", "tok1", true, dec!(20), dec!(0.5), now())
            .await
            .unwrap();

        let result = ledger
            .apply_reduction("m1", "tok1", dec!(0.5), dec!(0.5), now())
            .await
            .unwrap();
        assert_eq!(result.sold_shares, dec!(10));
        assert_eq!(ledger.exposure_of("A").await, dec!(5));
        let position = ledger.position_of("m1", "tok1").await.unwrap();
        assert_eq!(position.size, dec!(10));
    }

    #[tokio::test]
    async fn test_full_reduction_removes_position() {
        let ledger = ExposureLedger::new();
        let token = ledger.reserve("A", dec!(10), dec!(2000), dec!(5000)).await.unwrap();
        ledger
            .commit(token, "t1", "m1", "tok1", true, dec!(20), dec!(0.5), now())
            .await
            .unwrap();
        ledger
            .apply_reduction("m1", "tok1", dec!(1.0), dec!(0.5), now())
            .await
            .unwrap();
        assert!(ledger.position_of("m1", "tok1").await.is_none());
        assert_eq!(ledger.exposure_of("A").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_no_position_reduction_is_noop() {
        let ledger = ExposureLedger::new();
        let result = ledger.apply_reduction("nowhere", "tok", dec!(0.5), dec!(0.5), now()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_dedup_replay_no_side_effects() {
        let ledger = ExposureLedger::new();
        let token = ledger.reserve("A", dec!(10), dec!(2000), dec!(5000)).await.unwrap();
        ledger
            .commit(token, "t1", "m1", "tok1", true, dec!(20), dec!(0.5), now())
            .await
            .unwrap();
        assert!(ledger.has_processed("t1").await);
        // A second mirror attempt for the same trade_id must be rejected by
        // the caller before ever reaching reserve(); the ledger's role is
        // only to expose has_processed for that check.
        let exposure_before = ledger.exposure_of("A").await;
        assert_eq!(exposure_before, dec!(10));
    }
}
