use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::VenueError;
use crate::types::{MarketMeta, Position, Side};

/// Trader's own Polymarket API client: fetches trades, positions, and
/// market metadata for followed wallets, and places mirror orders.
pub struct TraderPolymarketClient {
    data_api_url: String,
    gamma_api_url: String,
    client: reqwest::Client,
    rate_limit_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTrade {
    #[serde(rename = "proxyWallet", alias = "proxy_wallet")]
    pub proxy_wallet: Option<String>,
    #[serde(rename = "conditionId", alias = "condition_id")]
    pub condition_id: Option<String>,
    pub asset: Option<String>,
    #[serde(deserialize_with = "de_opt_string_any", default)]
    pub size: Option<String>,
    #[serde(deserialize_with = "de_opt_string_any", default)]
    pub price: Option<String>,
    pub timestamp: Option<i64>,
    pub outcome: Option<String>,
    #[serde(rename = "outcomeIndex", alias = "outcome_index")]
    pub outcome_index: Option<i32>,
    pub side: Option<String>,
    #[serde(rename = "transactionHash", alias = "transaction_hash")]
    pub transaction_hash: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPosition {
    asset: Option<String>,
    #[serde(rename = "conditionId")]
    condition_id: Option<String>,
    #[serde(deserialize_with = "de_opt_string_any", default)]
    size: Option<String>,
    #[serde(rename = "avgPrice", deserialize_with = "de_opt_string_any", default)]
    avg_price: Option<String>,
    #[serde(rename = "initialValue", deserialize_with = "de_opt_string_any", default)]
    initial_value: Option<String>,
    #[serde(rename = "currentValue", deserialize_with = "de_opt_string_any", default)]
    current_value: Option<String>,
    #[serde(rename = "curPrice", deserialize_with = "de_opt_string_any", default)]
    current_price: Option<String>,
    #[serde(rename = "cashPnl", deserialize_with = "de_opt_string_any", default)]
    cash_pnl: Option<String>,
    outcome: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMarket {
    #[serde(rename = "conditionId")]
    condition_id: Option<String>,
    #[serde(rename = "negRisk")]
    neg_risk: Option<bool>,
    #[serde(rename = "orderPriceMinTickSize", deserialize_with = "de_opt_string_any", default)]
    tick_size: Option<String>,
    #[serde(rename = "orderMinSize", deserialize_with = "de_opt_string_any", default)]
    min_order_size: Option<String>,
    #[serde(rename = "liquidityNum", deserialize_with = "de_opt_string_any", default)]
    liquidity: Option<String>,
    category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Gtc,
    Fok,
}

impl OrderType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Gtc => "GTC",
            Self::Fok => "FOK",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderResult {
    #[serde(rename = "orderID")]
    pub order_id: String,
    pub status: String,
    pub success: bool,
}

impl TraderPolymarketClient {
    pub fn new(data_api_url: &str, rate_limit_delay_ms: u64) -> Self {
        Self::with_gamma(data_api_url, "https://gamma-api.polymarket.com", rate_limit_delay_ms)
    }

    pub fn with_gamma(data_api_url: &str, gamma_api_url: &str, rate_limit_delay_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            data_api_url: data_api_url.trim_end_matches('/').to_string(),
            gamma_api_url: gamma_api_url.trim_end_matches('/').to_string(),
            client,
            rate_limit_delay: Duration::from_millis(rate_limit_delay_ms),
        }
    }

    /// Fetch trades for a wallet at or after `since_timestamp` (unix
    /// seconds), newest activity capped at `limit`. Uses the Data API
    /// `/trades?user=<wallet>&limit=<n>&after=<since_timestamp>` endpoint.
    /// Callers drive `since_timestamp` from the watermark minus an overlap
    /// window (spec §4.3) rather than an offset, so a leader who trades more
    /// than `limit` times inside one poll interval cannot have fills drop
    /// off the page silently.
    pub async fn fetch_trades(
        &self,
        wallet: &str,
        since_timestamp: i64,
        limit: u32,
    ) -> Result<Vec<RawTrade>> {
        let encoded_wallet = urlencoding::encode(wallet);
        let mut url = format!(
            "{}/trades?user={encoded_wallet}&limit={limit}",
            self.data_api_url
        );
        if since_timestamp > 0 {
            url.push_str(&format!("&after={since_timestamp}"));
        }

        debug!(url = %url, "fetching trades");

        tokio::time::sleep(self.rate_limit_delay).await;

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch trades for {wallet}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                warn!(wallet = wallet, "rate limited fetching trades, backing off");
                tokio::time::sleep(Duration::from_secs(2)).await;
                return Ok(vec![]);
            }
            anyhow::bail!("trades API returned {status}: {body}");
        }

        let trades: Vec<RawTrade> = resp
            .json()
            .await
            .context("failed to deserialize trades response")?;

        debug!(wallet = wallet, count = trades.len(), "fetched trades");
        Ok(trades)
    }

    /// Fetch a wallet's open positions above `size_threshold` shares.
    pub async fn fetch_positions(&self, wallet: &str) -> Result<Vec<Position>, VenueError> {
        self.fetch_positions_above(wallet, Decimal::ZERO).await
    }

    pub async fn fetch_positions_above(
        &self,
        wallet: &str,
        size_threshold: Decimal,
    ) -> Result<Vec<Position>, VenueError> {
        let encoded_wallet = urlencoding::encode(wallet);
        let url = format!("{}/positions?user={encoded_wallet}", self.data_api_url);

        let resp = self.send(&url).await?;
        let raw: Vec<RawPosition> = resp
            .json()
            .await
            .map_err(|e| VenueError::Fatal(format!("failed to deserialize positions: {e}")))?;

        let positions = raw
            .into_iter()
            .filter_map(|p| parse_position(p).ok())
            .filter(|p: &Position| p.size >= size_threshold)
            .collect();
        Ok(positions)
    }

    /// Fetch market metadata by condition id.
    pub async fn fetch_market(&self, condition_id: &str) -> Result<MarketMeta, VenueError> {
        let encoded = urlencoding::encode(condition_id);
        let url = format!("{}/markets?condition_ids={encoded}", self.gamma_api_url);

        let resp = self.send(&url).await?;
        let raw: Vec<RawMarket> = resp
            .json()
            .await
            .map_err(|e| VenueError::Fatal(format!("failed to deserialize market: {e}")))?;
        let market = raw
            .into_iter()
            .next()
            .ok_or_else(|| VenueError::NotFound(format!("market {condition_id}")))?;

        Ok(MarketMeta {
            condition_id: market.condition_id.unwrap_or_else(|| condition_id.to_string()),
            neg_risk: market.neg_risk.unwrap_or(false),
            tick_size: parse_decimal_or(&market.tick_size, Decimal::new(1, 2)),
            min_order_size: parse_decimal_or(&market.min_order_size, Decimal::new(5, 0)),
            liquidity: parse_decimal_or(&market.liquidity, Decimal::ZERO),
            category: market.category,
        })
    }

    /// Fetch the current midpoint price for a token, if quotable.
    pub async fn fetch_midpoint(&self, token_id: &str) -> Result<Option<Decimal>, VenueError> {
        let encoded = urlencoding::encode(token_id);
        let url = format!("{}/midpoint?token_id={encoded}", self.data_api_url);

        let resp = match self.send(&url).await {
            Ok(resp) => resp,
            Err(VenueError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| VenueError::Fatal(format!("failed to deserialize midpoint: {e}")))?;
        let mid = body
            .get("mid")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok());
        Ok(mid)
    }

    /// Places a mirror order. Synthesizes a client order id from
    /// `(trade_id, attempt)` so repeated attempts (e.g. after a timeout)
    /// are idempotent even if the venue does not echo one back.
    pub async fn create_order(
        &self,
        token_id: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
        neg_risk: bool,
        order_type: OrderType,
        trade_id: &str,
        attempt: u32,
    ) -> Result<OrderResult, VenueError> {
        let client_order_id = format!("{trade_id}-{attempt}");
        let url = format!("{}/order", self.data_api_url);

        let body = serde_json::json!({
            "tokenID": token_id,
            "side": side.to_string(),
            "size": size.to_string(),
            "price": price.to_string(),
            "negRisk": neg_risk,
            "orderType": order_type.as_str(),
            "clientOrderId": client_order_id,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(VenueError::Auth(format!("order rejected: {status}")));
        }
        if status.as_u16() == 429 {
            return Err(VenueError::RateLimited);
        }
        if status.as_u16() == 400 {
            let text = resp.text().await.unwrap_or_default();
            return Err(VenueError::InvalidArgument(text));
        }
        if status.is_server_error() {
            return Err(VenueError::Transient(format!("order endpoint returned {status}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VenueError::Fatal(format!("order endpoint returned {status}: {text}")));
        }

        resp.json()
            .await
            .map_err(|e| VenueError::Fatal(format!("failed to deserialize order result: {e}")))
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, VenueError> {
        tokio::time::sleep(self.rate_limit_delay).await;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(VenueError::NotFound(url.to_string()));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(VenueError::Auth(format!("{status}")));
        }
        if status.as_u16() == 429 {
            return Err(VenueError::RateLimited);
        }
        if status.is_server_error() {
            return Err(VenueError::Transient(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            return Err(VenueError::Fatal(format!("{url} returned {status}")));
        }
        Ok(resp)
    }

    /// Check if a market has resolved. Returns Some(settle_price) if resolved, None otherwise.
    /// Uses the Gamma API markets endpoint.
    pub async fn check_market_resolution(&self, url: &str) -> Option<f64> {
        let resp = self.client.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }

        let markets: Vec<serde_json::Value> = resp.json().await.ok()?;
        let market = markets.first()?;

        let closed = market.get("closed")?.as_bool()?;
        if !closed {
            return None;
        }

        let price_str = market.get("outcomePrices")?.as_str()?;
        let prices: Vec<f64> = serde_json::from_str(price_str).ok()?;
        let settle_price = prices.first().copied()?;
        if settle_price >= 0.99 {
            Some(1.0)
        } else if settle_price <= 0.01 {
            Some(0.0)
        } else {
            None
        }
    }

    /// Compute a stable hash for a trade to use as watermark.
    pub fn trade_hash(trade: &RawTrade) -> String {
        if let Some(id) = &trade.id {
            return id.clone();
        }
        if let Some(hash) = &trade.transaction_hash {
            return hash.clone();
        }
        format!(
            "{}-{}-{}-{}",
            trade.proxy_wallet.as_deref().unwrap_or(""),
            trade.condition_id.as_deref().unwrap_or(""),
            trade.timestamp.unwrap_or(0),
            trade.side.as_deref().unwrap_or(""),
        )
    }
}

pub(crate) fn parse_decimal_or(value: &Option<String>, default: Decimal) -> Decimal {
    value.as_deref().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn parse_position(raw: RawPosition) -> Result<Position, ()> {
    Ok(Position {
        asset: raw.asset.ok_or(())?,
        condition_id: raw.condition_id.ok_or(())?,
        size: parse_decimal_or(&raw.size, Decimal::ZERO),
        avg_price: parse_decimal_or(&raw.avg_price, Decimal::ZERO),
        initial_value: parse_decimal_or(&raw.initial_value, Decimal::ZERO),
        current_value: parse_decimal_or(&raw.current_value, Decimal::ZERO),
        current_price: parse_decimal_or(&raw.current_price, Decimal::ZERO),
        cash_pnl: parse_decimal_or(&raw.cash_pnl, Decimal::ZERO),
        outcome: raw.outcome,
        title: raw.title,
    })
}

/// Deserialize a field that can be either a string or a number into Option<String>.
fn de_opt_string_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct StringOrNumber;

    impl<'de> de::Visitor<'de> for StringOrNumber {
        type Value = Option<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a string or number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_hash_with_id() {
        let trade = RawTrade {
            id: Some("trade-123".to_string()),
            proxy_wallet: Some("0xabc".to_string()),
            condition_id: Some("cond-1".to_string()),
            asset: None,
            size: Some("100".to_string()),
            price: Some("0.50".to_string()),
            timestamp: Some(1700000000),
            outcome: Some("Yes".to_string()),
            outcome_index: Some(0),
            side: Some("BUY".to_string()),
            transaction_hash: Some("0xhash".to_string()),
        };
        assert_eq!(TraderPolymarketClient::trade_hash(&trade), "trade-123");
    }

    #[test]
    fn test_trade_hash_fallback_to_tx_hash() {
        let trade = RawTrade {
            id: None,
            proxy_wallet: Some("0xabc".to_string()),
            condition_id: Some("cond-1".to_string()),
            asset: None,
            size: None,
            price: None,
            timestamp: Some(1700000000),
            outcome: None,
            outcome_index: None,
            side: Some("BUY".to_string()),
            transaction_hash: Some("0xtxhash".to_string()),
        };
        assert_eq!(TraderPolymarketClient::trade_hash(&trade), "0xtxhash");
    }

    #[test]
    fn test_trade_hash_fallback_composite() {
        let trade = RawTrade {
            id: None,
            proxy_wallet: Some("0xabc".to_string()),
            condition_id: Some("cond-1".to_string()),
            asset: None,
            size: None,
            price: None,
            timestamp: Some(1700000000),
            outcome: None,
            outcome_index: None,
            side: Some("BUY".to_string()),
            transaction_hash: None,
        };
        assert_eq!(
            TraderPolymarketClient::trade_hash(&trade),
            "0xabc-cond-1-1700000000-BUY"
        );
    }

    #[test]
    fn test_deserialize_raw_trade() {
        let json = r#"{
            "proxyWallet": "0xabc",
            "conditionId": "cond-1",
            "size": "100.5",
            "price": 0.65,
            "timestamp": 1700000000,
            "outcome": "Yes",
            "outcomeIndex": 0,
            "side": "BUY",
            "id": "t-1"
        }"#;
        let trade: RawTrade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.proxy_wallet.as_deref(), Some("0xabc"));
        assert_eq!(trade.condition_id.as_deref(), Some("cond-1"));
        assert_eq!(trade.size.as_deref(), Some("100.5"));
        assert_eq!(trade.price.as_deref(), Some("0.65"));
        assert_eq!(trade.timestamp, Some(1700000000));
        assert_eq!(trade.side.as_deref(), Some("BUY"));
    }

    #[test]
    fn test_deserialize_raw_trade_numeric_size() {
        let json = r#"{
            "proxyWallet": "0x1",
            "conditionId": "c-1",
            "size": 42.5,
            "price": "0.75",
            "timestamp": 1700000000,
            "side": "SELL"
        }"#;
        let trade: RawTrade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.size.as_deref(), Some("42.5"));
        assert_eq!(trade.price.as_deref(), Some("0.75"));
    }

    #[test]
    fn test_parse_position_defaults_missing_numbers_to_zero() {
        let raw = RawPosition {
            asset: Some("tok1".into()),
            condition_id: Some("m1".into()),
            size: None,
            avg_price: None,
            initial_value: None,
            current_value: None,
            current_price: None,
            cash_pnl: None,
            outcome: None,
            title: None,
        };
        let position = parse_position(raw).unwrap();
        assert_eq!(position.size, Decimal::ZERO);
    }
}
