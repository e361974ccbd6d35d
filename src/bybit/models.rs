//! Bybit v5 public market data models
//!
//! Bybit reports numbers as strings; conversion happens in the client.

use serde::Deserialize;

// ============================================================================
// Envelope
// ============================================================================

/// Common response wrapper; `ret_code` 0 means success
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitResponse<T> {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    pub result: Option<T>,
}

// ============================================================================
// Klines
// ============================================================================

/// `/v5/market/kline` result. Rows are
/// `[startTime, open, high, low, close, volume, turnover]`, newest first.
#[derive(Debug, Deserialize)]
pub struct KlineResult {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub list: Vec<Vec<String>>,
}

// ============================================================================
// Tickers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TickerResult {
    #[serde(default)]
    pub list: Vec<Ticker>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    pub last_price: String,
    /// Only present for perpetual categories
    #[serde(default)]
    pub funding_rate: String,
    #[serde(default)]
    pub turnover24h: String,
}
