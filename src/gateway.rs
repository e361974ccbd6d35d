//! Seams to the outside world
//!
//! The scanner only talks to market data and notifications through these
//! traits. Implementations absorb their own failures: a failed candle fetch
//! is an empty window, a failed funding lookup is `0.0`, a failed send is
//! dropped. Each implementation logs why.

use crate::types::Candle;

#[allow(async_fn_in_trait)]
pub trait MarketDataGateway {
    /// Up to `limit` candles for `symbol` on `interval`, oldest → newest.
    /// Empty when the data is unavailable.
    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> Vec<Candle>;

    /// Latest traded price, `None` when unavailable
    async fn last_price(&self, symbol: &str) -> Option<f64>;

    /// Absolute current funding rate, `0.0` when unavailable
    async fn funding_rate(&self, symbol: &str) -> f64;
}

#[allow(async_fn_in_trait)]
pub trait NotificationSink {
    /// Best-effort delivery; never reports failure to the caller
    async fn send(&self, text: &str);
}
