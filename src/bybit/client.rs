//! Bybit Public REST Client
//!
//! Unauthenticated market data for USDT perpetuals: klines, tickers
//! (last price, funding rate, 24h turnover).

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::models::*;
use crate::gateway::MarketDataGateway;
use crate::types::Candle;

/// Default API base URL for Bybit mainnet
pub const DEFAULT_BASE_URL: &str = "https://api.bybit.com";

/// Linear (USDT-margined) perpetuals
pub const DEFAULT_CATEGORY: &str = "linear";

/// Quote asset appended to base tickers ("BTC" → "BTCUSDT")
pub const QUOTE_ASSET: &str = "USDT";

/// Bybit market data client
pub struct BybitClient {
    client: Client,
    base_url: String,
    category: String,
}

impl BybitClient {
    /// Create a client from environment variables
    ///
    /// Reads (both optional):
    /// - `BYBIT_BASE_URL` - API base URL, defaults to mainnet
    /// - `BYBIT_CATEGORY` - instrument category, defaults to `linear`
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let base_url =
            std::env::var("BYBIT_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let category =
            std::env::var("BYBIT_CATEGORY").unwrap_or_else(|_| DEFAULT_CATEGORY.to_string());

        Self::new(base_url, category, timeout)
    }

    pub fn new(base_url: String, category: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("structure-scanner/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            category,
        })
    }

    /// Exchange pair for a base ticker
    pub fn pair(symbol: &str) -> String {
        format!("{}{}", symbol, QUOTE_ASSET)
    }

    /// GET a v5 endpoint and unwrap the response envelope
    async fn get<R: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<R> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, endpoint))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Request to {} failed ({}): {}", endpoint, status, body));
        }

        let envelope: BybitResponse<R> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", endpoint))?;

        if envelope.ret_code != 0 {
            return Err(anyhow!(
                "{} returned error: {} (code: {})",
                endpoint,
                envelope.ret_msg,
                envelope.ret_code
            ));
        }

        envelope
            .result
            .ok_or_else(|| anyhow!("{} returned no result", endpoint))
    }

    // ========================================================================
    // Klines
    // ========================================================================

    /// Fetch up to `limit` candles, returned oldest → newest
    pub async fn fetch_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let result: KlineResult = self
            .get(
                "/v5/market/kline",
                &[
                    ("category", self.category.clone()),
                    ("symbol", Self::pair(symbol)),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let total = result.list.len();
        let candles = parse_kline_rows(&result.list);
        if candles.len() < total {
            debug!(
                "Dropped {} malformed kline rows for {} {}",
                total - candles.len(),
                symbol,
                interval
            );
        }

        Ok(candles)
    }

    // ========================================================================
    // Tickers
    // ========================================================================

    /// Ticker snapshot for one symbol
    pub async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let result: TickerResult = self
            .get(
                "/v5/market/tickers",
                &[
                    ("category", self.category.clone()),
                    ("symbol", Self::pair(symbol)),
                ],
            )
            .await?;

        result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No ticker returned for {}", symbol))
    }

    pub async fn fetch_last_price(&self, symbol: &str) -> Result<f64> {
        let ticker = self.fetch_ticker(symbol).await?;
        parse_positive(&ticker.last_price)
            .ok_or_else(|| anyhow!("Invalid last price {:?} for {}", ticker.last_price, symbol))
    }

    /// Absolute funding rate
    pub async fn fetch_funding_rate(&self, symbol: &str) -> Result<f64> {
        let ticker = self.fetch_ticker(symbol).await?;
        ticker
            .funding_rate
            .parse::<f64>()
            .ok()
            .filter(|r| r.is_finite())
            .map(f64::abs)
            .ok_or_else(|| anyhow!("Invalid funding rate {:?} for {}", ticker.funding_rate, symbol))
    }

    /// Base tickers of the `top_n` USDT pairs by 24h turnover
    pub async fn top_symbols_by_turnover(&self, top_n: usize, min_turnover: f64) -> Result<Vec<String>> {
        let result: TickerResult = self
            .get("/v5/market/tickers", &[("category", self.category.clone())])
            .await?;

        Ok(rank_by_turnover(&result.list, top_n, min_turnover))
    }
}

impl MarketDataGateway for BybitClient {
    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> Vec<Candle> {
        match self.fetch_klines(symbol, interval, limit).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!("Kline fetch failed for {} {}: {:#}", symbol, interval, e);
                Vec::new()
            }
        }
    }

    async fn last_price(&self, symbol: &str) -> Option<f64> {
        match self.fetch_last_price(symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!("Price fetch failed for {}: {:#}", symbol, e);
                None
            }
        }
    }

    async fn funding_rate(&self, symbol: &str) -> f64 {
        match self.fetch_funding_rate(symbol).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!("Funding rate fetch failed for {} (treating as 0): {:#}", symbol, e);
                0.0
            }
        }
    }
}

fn parse_positive(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

/// Convert newest-first kline rows into oldest-first candles, dropping any
/// row that is short, unparseable or internally inconsistent.
pub fn parse_kline_rows(rows: &[Vec<String>]) -> Vec<Candle> {
    let mut candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| {
            if row.len() < 6 {
                return None;
            }
            let candle = Candle {
                open_time: row[0].parse().ok()?,
                open: parse_positive(&row[1])?,
                high: parse_positive(&row[2])?,
                low: parse_positive(&row[3])?,
                close: parse_positive(&row[4])?,
                volume: row[5].parse().ok().filter(|v: &f64| v.is_finite())?,
            };
            let consistent = candle.high >= candle.low
                && (candle.low..=candle.high).contains(&candle.close)
                && (candle.low..=candle.high).contains(&candle.open);
            consistent.then_some(candle)
        })
        .collect();

    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
    candles
}

/// Rank USDT pairs by 24h turnover, highest first
pub fn rank_by_turnover(tickers: &[Ticker], top_n: usize, min_turnover: f64) -> Vec<String> {
    let mut ranked: Vec<(String, f64)> = tickers
        .iter()
        .filter_map(|t| {
            let base = t.symbol.strip_suffix(QUOTE_ASSET)?;
            let turnover = t.turnover24h.parse::<f64>().ok().filter(|v| v.is_finite())?;
            (turnover >= min_turnover && !base.is_empty()).then(|| (base.to_string(), turnover))
        })
        .collect();

    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.into_iter().take(top_n).map(|(s, _)| s).collect()
}
