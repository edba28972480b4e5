use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct TraderConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub polymarket: PolymarketConfig,
    pub account: AccountConfig,
    pub traders: Vec<LeaderConfig>,
    pub risk_management: RiskManagementConfig,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
    pub trade_tracking: TradeTrackingConfig,
    #[allow(dead_code)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketConfig {
    pub data_api_url: String,
    pub gamma_api_url: String,
    pub rate_limit_delay_ms: u64,
}

/// `your_account` in spec terms: venue credentials plus the operator's total
/// bankroll. String fields may use an `env:NAME` prefix to pull from the
/// environment instead of storing the secret in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
    /// The operator's own proxy wallet, used to fetch our positions back
    /// from the venue for portfolio sync and startup reconciliation.
    pub wallet_address: String,
    pub total_capital: Decimal,
}

impl AccountConfig {
    fn resolve(&self) -> Result<(Option<String>, Option<String>, Option<String>)> {
        Ok((
            resolve_env(self.api_key.as_deref())?,
            resolve_env(self.api_secret.as_deref())?,
            resolve_env(self.api_passphrase.as_deref())?,
        ))
    }
}

/// Resolves a config string of the form `env:NAME` against the process
/// environment. Absence of the named variable is a fatal config error.
fn resolve_env(value: Option<&str>) -> Result<Option<String>> {
    let Some(value) = value else { return Ok(None) };
    match value.strip_prefix("env:") {
        Some(name) => {
            let resolved = std::env::var(name)
                .with_context(|| format!("env var {name} referenced by config is not set"))?;
            Ok(Some(resolved))
        }
        None => Ok(Some(value.to_string())),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderConfig {
    pub name: String,
    pub wallet_address: String,
    pub allocated_capital: Decimal,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskManagementConfig {
    pub global: GlobalRiskConfig,
    pub per_trader: PerTraderRiskConfig,
    pub market_filters: MarketFiltersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalRiskConfig {
    pub max_total_exposure: Decimal,
    pub max_single_bet: Decimal,
    pub reserve_capital: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerTraderRiskConfig {
    pub min_portfolio_value: Decimal,
    pub max_position_pct: f64,
    pub use_portfolio_proportion: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketFiltersConfig {
    #[serde(default)]
    pub whitelist_categories: Vec<String>,
    #[serde(default)]
    pub blacklist_categories: Vec<String>,
    pub min_liquidity: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub poll_interval_secs: u64,
    pub portfolio_sync_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub trades_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeTrackingConfig {
    pub poll_interval_secs: u64,
    pub output_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)] // Deserialized from TOML, not yet used in code
pub struct ObservabilityConfig {
    pub prometheus_port: u16,
}

/// Flattened, validated view of the risk-relevant config handed to the
/// risk manager and executor. Built once at startup from `TraderConfig`.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub total_capital: Decimal,
    pub reserve_capital: Decimal,
    pub max_total_exposure: Decimal,
    pub max_single_bet: Decimal,
    pub min_portfolio_value: Decimal,
    pub max_position_pct: f64,
    pub use_portfolio_proportion: bool,
    pub min_liquidity: Decimal,
    pub whitelist_categories: HashSet<String>,
    pub blacklist_categories: HashSet<String>,
    pub poll_interval: Duration,
    pub portfolio_sync_interval: Duration,
    /// Directory `trader::audit` appends per-wallet CSV audit records to.
    pub trade_tracking_output_dir: String,
}

impl TraderConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: TraderConfig =
            toml::from_str(content).context("failed to parse trader config")?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves `env:NAME` secrets, failing fast if any referenced variable
    /// is unset. Called once at startup after `load`.
    pub fn resolve_secrets(&self) -> Result<(Option<String>, Option<String>, Option<String>)> {
        self.account.resolve()
    }

    pub fn global_config(&self) -> GlobalConfig {
        let rm = &self.risk_management;
        GlobalConfig {
            total_capital: self.account.total_capital,
            reserve_capital: rm.global.reserve_capital,
            max_total_exposure: rm.global.max_total_exposure,
            max_single_bet: rm.global.max_single_bet,
            min_portfolio_value: rm.per_trader.min_portfolio_value,
            max_position_pct: rm.per_trader.max_position_pct,
            use_portfolio_proportion: rm.per_trader.use_portfolio_proportion,
            min_liquidity: rm.market_filters.min_liquidity,
            whitelist_categories: rm.market_filters.whitelist_categories.iter().cloned().collect(),
            blacklist_categories: rm.market_filters.blacklist_categories.iter().cloned().collect(),
            poll_interval: Duration::from_secs(self.monitoring.poll_interval_secs),
            portfolio_sync_interval: Duration::from_secs(self.monitoring.portfolio_sync_interval_secs),
            trade_tracking_output_dir: self.trade_tracking.output_dir.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            self.account.total_capital > Decimal::ZERO,
            "account.total_capital must be > 0"
        );
        anyhow::ensure!(
            self.risk_management.global.max_total_exposure > Decimal::ZERO,
            "risk_management.global.max_total_exposure must be > 0"
        );
        anyhow::ensure!(
            self.risk_management.per_trader.max_position_pct > 0.0
                && self.risk_management.per_trader.max_position_pct <= 1.0,
            "risk_management.per_trader.max_position_pct must be in (0, 1]"
        );

        let allocated_sum: Decimal = self.traders.iter().map(|t| t.allocated_capital).sum();
        let reserved = self.risk_management.global.reserve_capital;
        if allocated_sum + reserved > self.account.total_capital {
            bail!(
                "sum of trader allocations ({allocated_sum}) plus reserve_capital ({reserved}) \
                 exceeds total_capital ({})",
                self.account.total_capital
            );
        }

        let mut seen_wallets = HashSet::new();
        for trader in &self.traders {
            anyhow::ensure!(
                trader.allocated_capital > Decimal::ZERO,
                "traders[{}].allocated_capital must be > 0",
                trader.name
            );
            if !seen_wallets.insert(trader.wallet_address.to_lowercase()) {
                bail!("duplicate trader wallet_address: {}", trader.wallet_address);
            }
        }
        Ok(())
    }

    pub fn default_config_path() -> String {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(std::path::Path::to_path_buf));

        if let Some(dir) = &exe_dir {
            let candidate = dir.join("trader.toml");
            if candidate.exists() {
                return candidate.to_string_lossy().to_string();
            }
        }

        let candidate = Path::new("config/trader.toml");
        if candidate.exists() {
            return candidate.to_string_lossy().to_string();
        }

        let candidate = Path::new("crates/trader/config/trader.toml");
        if candidate.exists() {
            return candidate.to_string_lossy().to_string();
        }

        "config/trader.toml".to_string()
    }
}
