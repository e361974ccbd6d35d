//! Bybit Market Data Integration
//!
//! Implements [`MarketDataGateway`](crate::gateway::MarketDataGateway) on top
//! of Bybit's public v5 REST API.
//!
//! # Components
//!
//! - [`client`] - HTTP client, kline/ticker parsing, universe ranking
//! - [`models`] - Response envelope and payload types
//!
//! # Usage
//!
//! ```rust,ignore
//! use structure_scanner::bybit::BybitClient;
//!
//! let client = BybitClient::from_env(Duration::from_secs(10))?;
//! let candles = client.fetch_klines("BTC", "5", 200).await?;
//! let top = client.top_symbols_by_turnover(50, 10_000_000.0).await?;
//! ```

pub mod client;
pub mod models;

// Re-export commonly used types
pub use client::BybitClient;
pub use models::Ticker;
