//! Scanner configuration
//!
//! Every tunable the scanner, detectors and ledger read lives here. Values
//! come from CLI flags / environment (see `main.rs`) or from a JSON file.

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::trading_core::risk::ATR_PERIOD;

/// Locked top USDT perpetual universe (base-asset tickers)
pub const DEFAULT_SYMBOLS: &[&str] = &[
    "BTC", "ETH", "SOL", "BNB", "XRP", "ADA", "DOGE", "AVAX", "DOT", "LINK",
    "MATIC", "OP", "ARB", "ATOM", "LTC", "BCH", "ETC", "FIL", "APT", "NEAR",
    "SUI", "ICP", "INJ", "AAVE", "UNI", "PEPE", "TRX", "EOS", "XLM", "NEO",
    "ALGO", "FTM", "GALA", "DYDX", "SNX", "RUNE", "KAVA", "CAKE", "COMP", "CRV",
    "MASK", "LDO", "GMX", "1000SHIB", "WOO", "ENS", "YFI", "IMX", "ZEC", "MINA",
    "RNDR", "BLUR", "CFX", "HOOK", "STX", "KLAY", "LRC", "FLOW", "SAND", "MANA",
    "CHZ", "OCEAN", "ANKR", "QTUM", "BAT", "COTI", "IOTA", "CELR", "ROSE",
    "HNT", "WAVES", "SKL", "KNC", "BAL", "BAND", "FLUX", "API3", "STORJ",
    "ONE", "RVN", "HOT", "ICX", "DASH", "ZEN", "ONT", "AR",
];

/// Volatility multiples used to place stops and targets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    /// Initial stop distance in ATRs
    pub stop_multiplier: f64,
    /// Trailing stop distance in ATRs
    pub trail_multiplier: f64,
    /// TP1/TP2/TP3 distances in ATRs, strictly ascending
    pub reward_multiples: [f64; 3],
    /// Conventional partial-exit weights per TP level (metadata only)
    pub exit_weights: [f64; 3],
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            stop_multiplier: 1.5,
            trail_multiplier: 1.0,
            reward_multiples: [1.0, 2.0, 3.0],
            exit_weights: [0.3, 0.3, 0.4],
        }
    }
}

/// Full scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Candles behind the signal candle used for break-of-structure and trend bias
    pub structure_lookback: usize,
    /// Candles (including the signal candle) inspected for a liquidity sweep
    pub liquidity_lookback: usize,
    pub risk: RiskParams,
    /// Sleep between cycles
    pub scan_interval_secs: u64,
    /// Sleep after a failed cycle, used instead of the scan interval
    pub failure_backoff_secs: u64,
    /// Exit checks are suppressed this long after a trade opens
    pub min_hold_secs: u64,
    /// Lockout applied to a symbol after its trade closes
    pub cooldown_secs: u64,
    /// Symbols evaluated per cycle
    pub batch_size: usize,
    /// Width of a rotation bucket; defaults to the scan interval
    pub batch_period_secs: Option<u64>,
    /// Concurrent open trade cap; `None` is unbounded
    pub max_trades: Option<usize>,
    /// Reject signals whose absolute funding rate exceeds this
    pub max_funding_rate: Option<f64>,
    /// Ordered symbol universe
    pub symbols: Vec<String>,
    /// Entry timeframe identifier (exchange interval string)
    pub ltf_interval: String,
    /// Bias timeframes, shortest → longest
    pub htf_intervals: Vec<String>,
    /// Candles requested per window
    pub candle_limit: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            structure_lookback: 20,
            liquidity_lookback: 10,
            risk: RiskParams::default(),
            scan_interval_secs: 60,
            failure_backoff_secs: 10,
            min_hold_secs: 60,
            cooldown_secs: 1800,
            batch_size: 20,
            batch_period_secs: None,
            max_trades: None,
            max_funding_rate: None,
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            ltf_interval: "5".to_string(),
            htf_intervals: vec!["60".to_string(), "240".to_string()],
            candle_limit: 200,
        }
    }
}

impl ScannerConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    /// Minimum low-timeframe candles for detection and risk sizing
    pub fn ltf_candles_required(&self) -> usize {
        (self.structure_lookback + 1)
            .max(self.liquidity_lookback)
            .max(ATR_PERIOD + 2)
    }

    /// Minimum higher-timeframe candles for a bias reading
    pub fn htf_candles_required(&self) -> usize {
        self.structure_lookback + 1
    }

    pub fn batch_period_secs(&self) -> u64 {
        self.batch_period_secs.unwrap_or(self.scan_interval_secs)
    }

    pub fn min_hold(&self) -> Duration {
        Duration::seconds(self.min_hold_secs as i64)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }

    /// Reject configurations the scanner cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.structure_lookback == 0 {
            bail!("structure_lookback must be > 0");
        }
        if self.liquidity_lookback < 2 {
            bail!("liquidity_lookback must be >= 2 (prior candles plus the signal candle)");
        }

        let risk = &self.risk;
        if !(risk.stop_multiplier > 0.0) || !(risk.trail_multiplier > 0.0) {
            bail!("stop and trail multipliers must be positive");
        }
        let [r1, r2, r3] = risk.reward_multiples;
        if !(r1 > 0.0 && r1 < r2 && r2 < r3) {
            bail!(
                "reward multiples must be positive and strictly ascending, got {:?}",
                risk.reward_multiples
            );
        }

        if self.scan_interval_secs == 0 || self.batch_period_secs() == 0 {
            bail!("scan interval and batch period must be > 0");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be > 0");
        }
        if self.max_trades == Some(0) {
            bail!("max_trades of 0 would never open a trade; omit it for unbounded");
        }
        if let Some(cap) = self.max_funding_rate {
            if !(cap >= 0.0) {
                bail!("max_funding_rate must be non-negative");
            }
        }
        if self.symbols.is_empty() {
            bail!("symbol universe is empty");
        }
        if self.htf_intervals.is_empty() {
            bail!("at least one higher timeframe is required");
        }

        let need = self.ltf_candles_required().max(self.htf_candles_required());
        if self.candle_limit < need {
            bail!("candle_limit {} is below the {} candles the detectors need", self.candle_limit, need);
        }

        Ok(())
    }
}
