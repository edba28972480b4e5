pub mod detector;
pub mod mirror;
pub mod reconcile;
pub mod settlement;
pub mod watcher;

use crate::config::{GlobalConfig, LeaderConfig};
use crate::db::TraderDb;
use crate::ledger::ExposureLedger;
use crate::polymarket::TraderPolymarketClient;
use crate::portfolio::PortfolioTracker;
use crate::types::WalletStatus;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Handle to a running wallet watcher task.
struct WatcherHandle {
    cancel: CancellationToken,
    #[allow(dead_code)] // Stored for graceful shutdown via join
    handle: JoinHandle<()>,
}

/// A leader wallet under active or formerly-active mirroring, as persisted
/// in `followed_wallets`.
#[derive(Debug, Clone)]
pub struct FollowedWallet {
    pub proxy_wallet: String,
    pub name: String,
    pub allocated_capital: Decimal,
    pub status: WalletStatus,
    pub last_trade_seen_hash: Option<String>,
}

/// The wallet engine orchestrates all wallet watchers: one fast poll loop
/// per followed leader, sharing the exposure ledger and portfolio tracker.
pub struct WalletEngine {
    db: Arc<TraderDb>,
    client: Arc<TraderPolymarketClient>,
    ledger: Arc<ExposureLedger>,
    portfolio: Arc<PortfolioTracker>,
    config: Arc<GlobalConfig>,
    watchers: HashMap<String, WatcherHandle>,
    portfolio_sync: Option<WatcherHandle>,
    halted: Arc<AtomicBool>,
}

impl WalletEngine {
    pub fn new(
        db: Arc<TraderDb>,
        client: Arc<TraderPolymarketClient>,
        ledger: Arc<ExposureLedger>,
        portfolio: Arc<PortfolioTracker>,
        config: Arc<GlobalConfig>,
    ) -> Self {
        Self {
            db,
            client,
            ledger,
            portfolio,
            config,
            watchers: HashMap::new(),
            portfolio_sync: None,
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Seeds `followed_wallets` from the static leader list in config, for
    /// any wallet not already present (first boot, or a newly-added
    /// leader). Existing rows are left untouched so DB-tracked watermarks
    /// and status survive a config reload.
    pub async fn seed_from_config(&mut self, traders: &[LeaderConfig]) -> Result<()> {
        for trader in traders {
            if !trader.enabled {
                continue;
            }
            let addr = trader.wallet_address.clone();
            let name = trader.name.clone();
            let capital = trader.allocated_capital;
            let now = chrono::Utc::now().to_rfc3339();

            self.db
                .call(move |conn| {
                    conn.execute(
                        "INSERT OR IGNORE INTO followed_wallets
                         (proxy_wallet, name, allocated_capital, status, last_trade_seen_hash, added_at, updated_at)
                         VALUES (?1, ?2, ?3, 'active', NULL, ?4, ?4)",
                        rusqlite::params![addr, name, capital.to_string(), now],
                    )?;
                    Ok(())
                })
                .await
                .context("failed to seed followed wallet from config")?;
        }
        Ok(())
    }

    /// Load active wallets from DB and spawn watchers for each.
    pub async fn restore_watchers(&mut self) -> Result<()> {
        let wallets = self.load_active_wallets().await?;
        info!(count = wallets.len(), "restoring wallet watchers from DB");

        for wallet in wallets {
            if let Err(e) = self.spawn_watcher(wallet) {
                error!(error = %e, "failed to spawn restored watcher");
            }
        }

        Ok(())
    }

    /// Follow a new wallet — insert into DB and spawn a watcher.
    pub async fn follow_wallet(
        &mut self,
        proxy_wallet: String,
        name: String,
        allocated_capital: Decimal,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let wallet_addr = proxy_wallet.clone();
        let name_clone = name.clone();
        let now_clone = now.clone();

        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO followed_wallets
                     (proxy_wallet, name, allocated_capital, status, last_trade_seen_hash, added_at, updated_at)
                     VALUES (?1, ?2, ?3, 'active', NULL, ?4, ?4)",
                    rusqlite::params![wallet_addr, name_clone, allocated_capital.to_string(), now_clone],
                )?;
                Ok(())
            })
            .await
            .context("failed to insert followed wallet")?;

        info!(wallet = %proxy_wallet, name = %name, "following wallet");

        let wallet_info = FollowedWallet {
            proxy_wallet,
            name,
            allocated_capital,
            status: WalletStatus::Active,
            last_trade_seen_hash: None,
        };

        self.spawn_watcher(wallet_info)?;
        Ok(())
    }

    /// Stop following a wallet — cancel watcher and update DB.
    pub async fn unfollow_wallet(&mut self, proxy_wallet: &str) -> Result<()> {
        if let Some(handle) = self.watchers.remove(proxy_wallet) {
            handle.cancel.cancel();
            // Don't await the handle — let it clean up in background
        }

        let addr = proxy_wallet.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE followed_wallets SET status = 'removed', updated_at = ?1 WHERE proxy_wallet = ?2",
                    rusqlite::params![now, addr],
                )?;
                Ok(())
            })
            .await
            .context("failed to update wallet status to removed")?;

        info!(wallet = proxy_wallet, "unfollowed wallet");
        Ok(())
    }

    /// Pause a wallet — stop executing trades but keep watching.
    pub async fn pause_wallet(&mut self, proxy_wallet: &str) -> Result<()> {
        let addr = proxy_wallet.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE followed_wallets SET status = 'paused', updated_at = ?1 WHERE proxy_wallet = ?2",
                    rusqlite::params![now, addr],
                )?;
                Ok(())
            })
            .await
            .context("failed to pause wallet")?;

        info!(wallet = proxy_wallet, "paused wallet");
        Ok(())
    }

    /// Resume a paused wallet.
    pub async fn resume_wallet(&mut self, proxy_wallet: &str) -> Result<()> {
        let addr = proxy_wallet.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE followed_wallets SET status = 'active', updated_at = ?1 WHERE proxy_wallet = ?2",
                    rusqlite::params![now, addr],
                )?;
                Ok(())
            })
            .await
            .context("failed to resume wallet")?;

        if !self.watchers.contains_key(proxy_wallet) {
            let addr = proxy_wallet.to_string();
            let wallet = self
                .db
                .call(move |conn| {
                    conn.query_row(
                        "SELECT proxy_wallet, name, allocated_capital, last_trade_seen_hash
                         FROM followed_wallets WHERE proxy_wallet = ?1",
                        [&addr],
                        |row| {
                            let capital_str: String = row.get(2)?;
                            Ok(FollowedWallet {
                                proxy_wallet: row.get(0)?,
                                name: row.get(1)?,
                                allocated_capital: capital_str.parse().unwrap_or(Decimal::ZERO),
                                status: WalletStatus::Active,
                                last_trade_seen_hash: row.get(3)?,
                            })
                        },
                    )
                })
                .await
                .context("failed to load wallet metadata for resume")?;
            self.spawn_watcher(wallet)?;
        }

        info!(wallet = proxy_wallet, "resumed wallet");
        Ok(())
    }

    /// Emergency halt all trading.
    pub fn halt_all(&self) {
        self.halted.store(true, Ordering::SeqCst);
        warn!("ALL TRADING HALTED");
    }

    /// Resume trading after halt.
    pub fn resume_all(&self) {
        self.halted.store(false, Ordering::SeqCst);
        info!("trading resumed");
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Spawns the slow background loop (C2) that keeps the portfolio
    /// tracker's mirror-side snapshots fresh for every active wallet, on
    /// `config.portfolio_sync_interval`. Without this running, `mirror`
    /// never sees a post-BUY snapshot and every SELL stays `Deferred`
    /// forever.
    pub fn start_portfolio_sync(&mut self) {
        if self.portfolio_sync.is_some() {
            warn!("portfolio sync loop already running, skipping");
            return;
        }

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let db = Arc::clone(&self.db);
        let portfolio = Arc::clone(&self.portfolio);
        let interval_duration = self.config.portfolio_sync_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        info!("portfolio sync loop cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let addrs = match load_active_wallet_addrs(&db).await {
                            Ok(addrs) => addrs,
                            Err(e) => {
                                error!(error = %e, "failed to load wallets for portfolio sync");
                                continue;
                            }
                        };

                        for addr in addrs {
                            if let Err(e) = portfolio.sync(&addr).await {
                                warn!(wallet = %addr, error = %e, "portfolio sync failed");
                            }
                        }
                    }
                }
            }
        });

        self.portfolio_sync = Some(WatcherHandle { cancel, handle });
        info!("portfolio sync loop started");
    }

    /// Shut down all watchers gracefully.
    #[allow(dead_code)] // Used in tests for clean shutdown
    pub async fn shutdown(&mut self) {
        info!(
            count = self.watchers.len(),
            "shutting down all wallet watchers"
        );
        for (addr, handle) in self.watchers.drain() {
            handle.cancel.cancel();
            if let Err(e) = handle.handle.await {
                error!(wallet = %addr, error = %e, "watcher task panicked on shutdown");
            }
        }

        if let Some(handle) = self.portfolio_sync.take() {
            handle.cancel.cancel();
            if let Err(e) = handle.handle.await {
                error!(error = %e, "portfolio sync task panicked on shutdown");
            }
        }
    }

    fn spawn_watcher(&mut self, wallet: FollowedWallet) -> Result<()> {
        let addr = wallet.proxy_wallet.clone();

        if self.watchers.contains_key(&addr) {
            warn!(wallet = %addr, "watcher already running, skipping");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let db = Arc::clone(&self.db);
        let client = Arc::clone(&self.client);
        let ledger = Arc::clone(&self.ledger);
        let portfolio = Arc::clone(&self.portfolio);
        let config = Arc::clone(&self.config);
        let halted = Arc::clone(&self.halted);
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(async move {
            watcher::run_watcher(db, client, ledger, portfolio, config, wallet, halted, cancel_clone).await;
        });

        self.watchers.insert(addr, WatcherHandle { cancel, handle });
        Ok(())
    }

    async fn load_active_wallets(&self) -> Result<Vec<FollowedWallet>> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT proxy_wallet, name, allocated_capital, status, last_trade_seen_hash
                     FROM followed_wallets WHERE status = 'active'",
                )?;
                let wallets = stmt
                    .query_map([], |row| {
                        let status_str: String = row.get(3)?;
                        let capital_str: String = row.get(2)?;
                        Ok(FollowedWallet {
                            proxy_wallet: row.get(0)?,
                            name: row.get(1)?,
                            allocated_capital: capital_str.parse().unwrap_or(Decimal::ZERO),
                            status: WalletStatus::from_str_loose(&status_str)
                                .unwrap_or(WalletStatus::Active),
                            last_trade_seen_hash: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(wallets)
            })
            .await
            .context("failed to load active wallets")
    }
}

/// Thin proxy-wallet-only variant of `WalletEngine::load_active_wallets`,
/// used by the portfolio sync loop which only needs addresses to sync.
async fn load_active_wallet_addrs(db: &TraderDb) -> Result<Vec<String>> {
    db.call(|conn| {
        let mut stmt =
            conn.prepare("SELECT proxy_wallet FROM followed_wallets WHERE status = 'active'")?;
        let addrs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(addrs)
    })
    .await
    .context("failed to load active wallet addresses")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<GlobalConfig> {
        let content = std::fs::read_to_string("config/trader.toml").unwrap();
        let config = crate::config::TraderConfig::from_str(&content).unwrap();
        Arc::new(config.global_config())
    }

    fn test_engine(db: Arc<TraderDb>) -> (WalletEngine, Arc<TraderPolymarketClient>) {
        let client = Arc::new(TraderPolymarketClient::new(
            "https://data-api.polymarket.com",
            200,
        ));
        let ledger = Arc::new(ExposureLedger::new());
        let portfolio = Arc::new(PortfolioTracker::new(Arc::clone(&client)));
        let config = test_config();
        let engine = WalletEngine::new(db, Arc::clone(&client), ledger, portfolio, config);
        (engine, client)
    }

    #[tokio::test]
    async fn test_follow_and_unfollow_wallet() {
        let db = Arc::new(TraderDb::open_memory().await.unwrap());
        let (mut engine, _client) = test_engine(Arc::clone(&db));

        engine
            .follow_wallet("0xtest123".to_string(), "test".to_string(), Decimal::new(5000, 0))
            .await
            .unwrap();

        assert_eq!(engine.watcher_count(), 1);

        let count: i64 = db
            .call(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM followed_wallets WHERE proxy_wallet = '0xtest123'",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(count, 1);

        engine.unfollow_wallet("0xtest123").await.unwrap();
        assert_eq!(engine.watcher_count(), 0);

        let status: String = db
            .call(|conn| {
                conn.query_row(
                    "SELECT status FROM followed_wallets WHERE proxy_wallet = '0xtest123'",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(status, "removed");

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_halt_and_resume() {
        let db = Arc::new(TraderDb::open_memory().await.unwrap());
        let (engine, _client) = test_engine(db);

        assert!(!engine.is_halted());
        engine.halt_all();
        assert!(engine.is_halted());
        engine.resume_all();
        assert!(!engine.is_halted());
    }

    #[tokio::test]
    async fn test_start_portfolio_sync_and_shutdown() {
        let db = Arc::new(TraderDb::open_memory().await.unwrap());
        let (mut engine, _client) = test_engine(db);

        engine.start_portfolio_sync();
        assert!(engine.portfolio_sync.is_some());

        // Starting twice is a no-op, not a second task.
        engine.start_portfolio_sync();

        engine.shutdown().await;
        assert!(engine.portfolio_sync.is_none());
    }

    #[tokio::test]
    async fn test_restore_watchers_empty() {
        let db = Arc::new(TraderDb::open_memory().await.unwrap());
        let (mut engine, _client) = test_engine(db);
        engine.restore_watchers().await.unwrap();
        assert_eq!(engine.watcher_count(), 0);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_follow_replaces() {
        let db = Arc::new(TraderDb::open_memory().await.unwrap());
        let (mut engine, _client) = test_engine(db);

        engine
            .follow_wallet("0xdup".to_string(), "first".to_string(), Decimal::new(1000, 0))
            .await
            .unwrap();

        engine
            .follow_wallet("0xdup".to_string(), "second".to_string(), Decimal::new(2000, 0))
            .await
            .unwrap();

        assert_eq!(engine.watcher_count(), 1);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_seed_from_config_skips_disabled() {
        let db = Arc::new(TraderDb::open_memory().await.unwrap());
        let (mut engine, _client) = test_engine(Arc::clone(&db));

        let traders = vec![
            LeaderConfig {
                name: "alpha".into(),
                wallet_address: "0xalpha".into(),
                allocated_capital: Decimal::new(1000, 0),
                enabled: true,
            },
            LeaderConfig {
                name: "beta".into(),
                wallet_address: "0xbeta".into(),
                allocated_capital: Decimal::new(500, 0),
                enabled: false,
            },
        ];
        engine.seed_from_config(&traders).await.unwrap();

        let count: i64 = db
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM followed_wallets", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
