use crate::polymarket::{RawTrade, TraderPolymarketClient};
use std::collections::{HashSet, VecDeque};

/// Watermark-based new trade detector. Tracks which trade hashes we've
/// already seen in a bounded LRU set and filters a poll batch down to only
/// the new ones, oldest first.
pub struct TradeDetector {
    seen_hashes: HashSet<String>,
    seen_order: VecDeque<String>,
    max_seen: usize,
    last_timestamp: Option<i64>,
}

impl TradeDetector {
    pub fn new(last_seen_hash: Option<String>) -> Self {
        Self::with_bound(last_seen_hash, 5_000)
    }

    pub fn with_bound(last_seen_hash: Option<String>, max_seen: usize) -> Self {
        let mut detector = Self {
            seen_hashes: HashSet::new(),
            seen_order: VecDeque::new(),
            max_seen,
            last_timestamp: None,
        };
        if let Some(hash) = last_seen_hash {
            detector.remember(hash);
        }
        detector
    }

    fn remember(&mut self, hash: String) {
        if self.seen_hashes.insert(hash.clone()) {
            self.seen_order.push_back(hash);
            while self.seen_order.len() > self.max_seen {
                if let Some(oldest) = self.seen_order.pop_front() {
                    self.seen_hashes.remove(&oldest);
                }
            }
        }
    }

    /// Filter a batch of trades to only those not yet marked delivered.
    /// Returns new trades in chronological order (oldest first). Does not
    /// itself mark anything delivered — a trade the caller defers (e.g. a
    /// SELL with no post-BUY snapshot yet, per Open Question 3) must
    /// resurface on the next poll, so the hash is only remembered once
    /// `mark_delivered` is called explicitly.
    pub fn detect_new<'a>(&mut self, trades: &'a [RawTrade]) -> Vec<&'a RawTrade> {
        let mut new_trades: Vec<&RawTrade> = trades
            .iter()
            .filter(|trade| !self.seen_hashes.contains(&TraderPolymarketClient::trade_hash(trade)))
            .collect();

        new_trades.sort_by_key(|t| t.timestamp.unwrap_or(0));

        if let Some(last) = new_trades.last() {
            if let Some(ts) = last.timestamp {
                self.last_timestamp = Some(ts);
            }
        }

        new_trades
    }

    /// Marks a trade hash delivered so `detect_new` stops surfacing it.
    /// Callers must call this for every trade handled to completion
    /// (anything other than deferred) once the executor result is known.
    pub fn mark_delivered(&mut self, hash: &str) {
        self.remember(hash.to_string());
    }

    /// Watermark timestamp of the most recently detected trade, used to
    /// widen the next poll's overlap window rather than relying purely on
    /// hash dedup.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    pub fn seen_count(&self) -> usize {
        self.seen_hashes.len()
    }
}
