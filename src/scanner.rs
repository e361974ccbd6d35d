//! Scan scheduler
//!
//! One cycle = purge expired cooldowns, manage every open trade at its latest
//! price, then evaluate one rotating batch of the universe for new entries.
//! The scanner owns the ledger, so every ledger write happens on this task.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ScannerConfig;
use crate::gateway::{MarketDataGateway, NotificationSink};
use crate::trading_core::{risk, signal, trend};
use crate::trading_core::{OpenOutcome, RiskLevels, StatsBook, Trade, TradeEvent, TradeLedger};
use crate::types::{Bias, Detection, Direction};

/// What happened to one symbol during a scan
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Already has a trade or is cooling down
    Busy,
    AtCapacity,
    InsufficientData {
        interval: String,
        have: usize,
        need: usize,
    },
    /// Every higher timeframe is ranging
    NoTrend,
    NoSignal,
    AgainstTrend {
        direction: Direction,
        bias: Bias,
    },
    FundingTooHigh {
        rate: f64,
    },
    /// No usable ATR, or a stop or target would not be a positive price
    NoRiskLevels,
    Refused(OpenOutcome),
    Opened(Trade),
}

/// Per-cycle counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub managed: usize,
    pub targets_hit: usize,
    pub closed: usize,
    pub scanned: usize,
    pub insufficient: usize,
    pub signals: usize,
    pub filtered: usize,
    pub opened: usize,
}

impl CycleSummary {
    fn record(&mut self, evaluation: &Evaluation) {
        match evaluation {
            Evaluation::Busy | Evaluation::AtCapacity => {}
            Evaluation::InsufficientData { .. } => {
                self.scanned += 1;
                self.insufficient += 1;
            }
            Evaluation::NoTrend | Evaluation::NoSignal => self.scanned += 1,
            Evaluation::AgainstTrend { .. }
            | Evaluation::FundingTooHigh { .. }
            | Evaluation::NoRiskLevels
            | Evaluation::Refused(_) => {
                self.scanned += 1;
                self.signals += 1;
                self.filtered += 1;
            }
            Evaluation::Opened(_) => {
                self.scanned += 1;
                self.signals += 1;
                self.opened += 1;
            }
        }
    }
}

/// Slice of `symbols` to evaluate at `now`.
///
/// The universe is cut into `batch_size` chunks and the chunk index is
/// `floor(now / period) mod chunk_count`, so consecutive periods walk the
/// whole universe.
pub fn select_batch(
    symbols: &[String],
    batch_size: usize,
    period_secs: u64,
    now: DateTime<Utc>,
) -> Result<&[String]> {
    if symbols.is_empty() {
        bail!("symbol universe is empty");
    }
    if batch_size == 0 || period_secs == 0 {
        bail!("batch size and batch period must be > 0");
    }

    let batches = symbols.len().div_ceil(batch_size);
    let bucket = now.timestamp().max(0) as u64 / period_secs;
    let index = (bucket % batches as u64) as usize;

    let start = index * batch_size;
    let end = (start + batch_size).min(symbols.len());
    Ok(&symbols[start..end])
}

fn open_message(trade: &Trade, levels: &RiskLevels) -> String {
    format!(
        "🚀 {} {}\nEntry: {:.4}\nTP1: {:.4}\nTP2: {:.4}\nTP3: {:.4}\nSL: {:.4}\nTrail from: {:.4}",
        trade.side,
        trade.symbol,
        trade.entry,
        trade.take_profits[0],
        trade.take_profits[1],
        trade.take_profits[2],
        trade.stop_loss,
        levels.trail_seed
    )
}

pub struct Scanner<G, N> {
    config: ScannerConfig,
    gateway: G,
    notifier: N,
    ledger: TradeLedger,
    stats: StatsBook,
}

impl<G: MarketDataGateway, N: NotificationSink> Scanner<G, N> {
    pub fn new(config: ScannerConfig, gateway: G, notifier: N, ledger: TradeLedger, stats: StatsBook) -> Self {
        Self {
            config,
            gateway,
            notifier,
            ledger,
            stats,
        }
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn stats(&self) -> &StatsBook {
        &self.stats
    }

    /// Run cycles forever, sleeping the scan interval after each success and
    /// the failure backoff after each failed cycle.
    pub async fn run(&mut self) {
        let interval = Duration::from_secs(self.config.scan_interval_secs);
        let backoff = Duration::from_secs(self.config.failure_backoff_secs);

        info!(
            "Scanner started: {} symbols, batch {}, every {:?}",
            self.config.symbols.len(),
            self.config.batch_size,
            interval
        );

        loop {
            match self.run_cycle(Utc::now()).await {
                Ok(summary) => {
                    info!(
                        "Cycle done: managed {} (tp {}, closed {}) | scanned {} (short data {}) | signals {} (filtered {}, opened {}) | open {}",
                        summary.managed,
                        summary.targets_hit,
                        summary.closed,
                        summary.scanned,
                        summary.insufficient,
                        summary.signals,
                        summary.filtered,
                        summary.opened,
                        self.ledger.open_count()
                    );
                    tokio::time::sleep(interval).await;
                }
                Err(e) => {
                    error!("Cycle failed: {:#}; retrying in {:?}", e, backoff);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// One full cycle at `now`: management pass, then the batch scan
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();

        self.ledger.purge_expired_cooldowns(now);
        self.manage_open_trades(now, &mut summary).await;

        let batch = select_batch(
            &self.config.symbols,
            self.config.batch_size,
            self.config.batch_period_secs(),
            now,
        )?
        .to_vec();
        debug!("Scanning batch of {}: {}", batch.len(), batch.join(","));

        for symbol in &batch {
            let evaluation = self.evaluate_symbol(symbol, now).await;
            match &evaluation {
                Evaluation::InsufficientData { interval, have, need } => {
                    debug!("{}: {} candles on {} (need {}), skipped", symbol, have, interval, need);
                }
                Evaluation::AgainstTrend { direction, bias } => {
                    debug!("{}: {} signal against {} bias, rejected", symbol, direction, bias);
                }
                Evaluation::FundingTooHigh { rate } => {
                    info!("{}: funding {:.5} above cap, signal rejected", symbol, rate);
                }
                Evaluation::Refused(outcome) => {
                    info!("{}: open refused: {:?}", symbol, outcome);
                }
                _ => {}
            }
            summary.record(&evaluation);
        }

        if self.ledger.has_pending_write() {
            warn!("Ledger has unsaved changes; will retry on next mutation");
        }

        Ok(summary)
    }

    /// Apply the latest price to every open trade
    async fn manage_open_trades(&mut self, now: DateTime<Utc>, summary: &mut CycleSummary) {
        for symbol in self.ledger.open_symbols() {
            let Some(price) = self.gateway.last_price(&symbol).await else {
                warn!("{}: no price this cycle, management skipped", symbol);
                continue;
            };

            summary.managed += 1;
            let events = self.ledger.manage(&symbol, price, now);

            for event in events {
                match &event {
                    TradeEvent::TakeProfitHit { .. } => summary.targets_hit += 1,
                    TradeEvent::Closed { trade, reason, .. } => {
                        summary.closed += 1;
                        self.stats.record(&trade.symbol, reason.is_win());
                    }
                    TradeEvent::StopRaised { .. } => {}
                }
                if let Some(message) = event.message() {
                    self.notifier.send(&message).await;
                }
            }
        }
    }

    /// Evaluate one symbol for a new entry and open it if every filter passes
    pub async fn evaluate_symbol(&mut self, symbol: &str, now: DateTime<Utc>) -> Evaluation {
        if self.ledger.is_open(symbol) || self.ledger.cooldown_until(symbol, now).is_some() {
            return Evaluation::Busy;
        }
        if self.ledger.at_capacity() {
            return Evaluation::AtCapacity;
        }

        let limit = self.config.candle_limit;
        let ltf_interval = self.config.ltf_interval.as_str();
        let (ltf, htfs) = tokio::join!(
            self.gateway.candles(symbol, ltf_interval, limit),
            join_all(
                self.config
                    .htf_intervals
                    .iter()
                    .map(|interval| self.gateway.candles(symbol, interval, limit))
            )
        );

        let need = self.config.ltf_candles_required();
        if ltf.len() < need {
            return Evaluation::InsufficientData {
                interval: ltf_interval.to_string(),
                have: ltf.len(),
                need,
            };
        }

        let lookback = self.config.structure_lookback;
        let mut biases = Vec::with_capacity(htfs.len());
        for (interval, candles) in self.config.htf_intervals.iter().zip(&htfs) {
            match trend::classify(candles, lookback) {
                Some(bias) => biases.push(bias),
                None => {
                    return Evaluation::InsufficientData {
                        interval: interval.clone(),
                        have: candles.len(),
                        need: self.config.htf_candles_required(),
                    }
                }
            }
        }

        let Some(dominant) = trend::dominant_bias(&biases) else {
            return Evaluation::NoTrend;
        };

        let signal = match signal::detect(&ltf, lookback, self.config.liquidity_lookback) {
            Detection::Signal(signal) => signal,
            Detection::NoSignal => return Evaluation::NoSignal,
            Detection::InsufficientData { have, need } => {
                return Evaluation::InsufficientData {
                    interval: ltf_interval.to_string(),
                    have,
                    need,
                }
            }
        };

        if dominant.opposes(signal.direction) {
            return Evaluation::AgainstTrend {
                direction: signal.direction,
                bias: dominant,
            };
        }

        if let Some(cap) = self.config.max_funding_rate {
            let rate = self.gateway.funding_rate(symbol).await;
            if rate.abs() > cap {
                return Evaluation::FundingTooHigh { rate };
            }
        }

        let Some(levels) = risk::compute_levels(&ltf, signal.direction, &self.config.risk) else {
            return Evaluation::NoRiskLevels;
        };

        info!(
            "SIGNAL {} {} @ {:.4} (level {:.4}) | HTF {:?}",
            signal.label(),
            symbol,
            signal.price,
            signal.level,
            biases
        );
        self.notifier
            .send(&format!("📌 {} {}", signal.label(), symbol))
            .await;

        match self.ledger.open(symbol, &levels, now) {
            OpenOutcome::Opened(trade) => {
                self.notifier.send(&open_message(&trade, &levels)).await;
                Evaluation::Opened(trade)
            }
            refused => Evaluation::Refused(refused),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::{LedgerPolicy, SymbolStats};
    use crate::types::Candle;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockData {
        candles: HashMap<(String, String), Vec<Candle>>,
        prices: HashMap<String, f64>,
        funding: HashMap<String, f64>,
        requests: Vec<String>,
    }

    #[derive(Clone, Default)]
    struct MockGateway(Arc<Mutex<MockData>>);

    impl MockGateway {
        fn set_candles(&self, symbol: &str, interval: &str, candles: Vec<Candle>) {
            self.0
                .lock()
                .unwrap()
                .candles
                .insert((symbol.to_string(), interval.to_string()), candles);
        }

        fn set_price(&self, symbol: &str, price: f64) {
            self.0.lock().unwrap().prices.insert(symbol.to_string(), price);
        }

        fn set_funding(&self, symbol: &str, rate: f64) {
            self.0.lock().unwrap().funding.insert(symbol.to_string(), rate);
        }

        fn requests(&self) -> Vec<String> {
            self.0.lock().unwrap().requests.clone()
        }
    }

    impl MarketDataGateway for MockGateway {
        async fn candles(&self, symbol: &str, interval: &str, _limit: usize) -> Vec<Candle> {
            let mut data = self.0.lock().unwrap();
            data.requests.push(format!("candles {} {}", symbol, interval));
            data.candles
                .get(&(symbol.to_string(), interval.to_string()))
                .cloned()
                .unwrap_or_default()
        }

        async fn last_price(&self, symbol: &str) -> Option<f64> {
            let mut data = self.0.lock().unwrap();
            data.requests.push(format!("price {}", symbol));
            data.prices.get(symbol).copied()
        }

        async fn funding_rate(&self, symbol: &str) -> f64 {
            self.0.lock().unwrap().funding.get(symbol).copied().unwrap_or(0.0)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<String>>>);

    impl RecordingSink {
        fn messages(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl NotificationSink for RecordingSink {
        async fn send(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    /// 200 candles whose last close breaks 1 above the prior 20-bar high (ATR 10)
    fn breakout_up() -> Vec<Candle> {
        let mut bars: Vec<Candle> = (0..199).map(|_| candle(105.0, 95.0, 100.0)).collect();
        bars.push(candle(106.5, 99.0, 106.0));
        bars
    }

    fn htf(last_close: f64) -> Vec<Candle> {
        let mut bars: Vec<Candle> = (0..50).map(|_| candle(105.0, 95.0, 100.0)).collect();
        bars.push(candle(last_close.max(100.0), last_close.min(100.0), last_close));
        bars
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap()
    }

    fn config(symbols: &[&str]) -> ScannerConfig {
        ScannerConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn scanner(config: ScannerConfig) -> (Scanner<MockGateway, RecordingSink>, MockGateway, RecordingSink) {
        let gateway = MockGateway::default();
        let sink = RecordingSink::default();
        let ledger = TradeLedger::new(LedgerPolicy::from_config(&config));
        let scanner = Scanner::new(config, gateway.clone(), sink.clone(), ledger, StatsBook::default());
        (scanner, gateway, sink)
    }

    #[tokio::test]
    async fn test_opens_trade_with_trend() {
        let (mut scanner, gateway, sink) = scanner(config(&["BTC"]));
        gateway.set_candles("BTC", "5", breakout_up());
        gateway.set_candles("BTC", "60", htf(100.0));
        gateway.set_candles("BTC", "240", htf(107.0));

        let summary = scanner.run_cycle(t0()).await.unwrap();
        assert_eq!(summary.opened, 1);

        let trade = scanner.ledger().get("BTC").unwrap();
        assert_eq!(trade.side, Direction::Long);
        assert_eq!(trade.entry, 106.0);
        assert_eq!(trade.stop_loss, 91.0);
        assert_eq!(trade.take_profits, [116.0, 126.0, 136.0]);

        let messages = sink.messages();
        assert_eq!(messages[0], "📌 BOS BUY BTC");
        assert!(messages[1].starts_with("🚀 LONG BTC\nEntry: 106.0000"));
        assert!(messages[1].ends_with("SL: 91.0000\nTrail from: 96.0000"));
    }

    #[tokio::test]
    async fn test_rejects_signal_against_dominant_bias() {
        let (mut scanner, gateway, sink) = scanner(config(&["BTC"]));
        gateway.set_candles("BTC", "5", breakout_up());
        // medium timeframe agrees but the long one is bearish
        gateway.set_candles("BTC", "60", htf(107.0));
        gateway.set_candles("BTC", "240", htf(90.0));

        assert_eq!(
            scanner.evaluate_symbol("BTC", t0()).await,
            Evaluation::AgainstTrend {
                direction: Direction::Long,
                bias: Bias::Bear
            }
        );
        assert!(sink.messages().is_empty());
    }

    #[tokio::test]
    async fn test_requires_a_trending_timeframe() {
        let (mut scanner, gateway, _) = scanner(config(&["BTC"]));
        gateway.set_candles("BTC", "5", breakout_up());
        gateway.set_candles("BTC", "60", htf(100.0));
        gateway.set_candles("BTC", "240", htf(101.0));

        assert_eq!(scanner.evaluate_symbol("BTC", t0()).await, Evaluation::NoTrend);
        assert_eq!(scanner.ledger().open_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_data_is_skipped() {
        let (mut scanner, gateway, _) = scanner(config(&["BTC", "ETH"]));
        gateway.set_candles("ETH", "5", breakout_up());
        gateway.set_candles("ETH", "60", htf(107.0));
        gateway.set_candles("ETH", "240", htf(107.0)[..10].to_vec());

        assert_eq!(
            scanner.evaluate_symbol("BTC", t0()).await,
            Evaluation::InsufficientData {
                interval: "5".to_string(),
                have: 0,
                need: 21
            }
        );
        assert_eq!(
            scanner.evaluate_symbol("ETH", t0()).await,
            Evaluation::InsufficientData {
                interval: "240".to_string(),
                have: 10,
                need: 21
            }
        );

        let summary = scanner.run_cycle(t0()).await.unwrap();
        assert_eq!(summary.insufficient, 2);
        assert_eq!(summary.opened, 0);
    }

    #[tokio::test]
    async fn test_funding_cap() {
        let mut cfg = config(&["BTC"]);
        cfg.max_funding_rate = Some(0.001);
        let (mut scanner, gateway, _) = scanner(cfg);
        gateway.set_candles("BTC", "5", breakout_up());
        gateway.set_candles("BTC", "60", htf(107.0));
        gateway.set_candles("BTC", "240", htf(107.0));
        gateway.set_funding("BTC", 0.003);

        assert_eq!(
            scanner.evaluate_symbol("BTC", t0()).await,
            Evaluation::FundingTooHigh { rate: 0.003 }
        );

        // the cap applies to the magnitude whichever side pays
        gateway.set_funding("BTC", -0.003);
        assert_eq!(
            scanner.evaluate_symbol("BTC", t0()).await,
            Evaluation::FundingTooHigh { rate: -0.003 }
        );

        gateway.set_funding("BTC", -0.0005);
        assert!(matches!(
            scanner.evaluate_symbol("BTC", t0()).await,
            Evaluation::Opened(_)
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_and_cooldown() {
        let (mut scanner, gateway, sink) = scanner(config(&["BTC"]));
        gateway.set_candles("BTC", "5", breakout_up());
        gateway.set_candles("BTC", "60", htf(107.0));
        gateway.set_candles("BTC", "240", htf(107.0));

        scanner.run_cycle(t0()).await.unwrap();
        assert!(scanner.ledger().is_open("BTC"));

        // price gaps through all three targets after the minimum hold
        gateway.set_price("BTC", 140.0);
        let later = t0() + ChronoDuration::seconds(120);
        let summary = scanner.run_cycle(later).await.unwrap();
        assert_eq!(summary.managed, 1);
        assert_eq!(summary.targets_hit, 2);
        assert_eq!(summary.closed, 1);
        // the signal is still on the chart but the symbol is cooling down
        assert_eq!(summary.opened, 0);
        assert!(!scanner.ledger().is_open("BTC"));
        assert_eq!(scanner.stats().get("BTC"), SymbolStats { wins: 1, losses: 0 });

        let messages = sink.messages();
        assert!(messages.iter().any(|m| m.starts_with("🥇 TP1 HIT BTC")));
        assert!(messages.iter().any(|m| m.starts_with("🥈 TP2 HIT BTC")));
        assert!(messages.last().unwrap().starts_with("✅ TP3 HIT BTC"));

        // cooldown over: the same setup opens again
        let after_cooldown = later + ChronoDuration::seconds(1800);
        let summary = scanner.run_cycle(after_cooldown).await.unwrap();
        assert_eq!(summary.opened, 1);
    }

    #[tokio::test]
    async fn test_management_runs_before_scan() {
        let (mut scanner, gateway, _) = scanner(config(&["BTC", "ETH"]));
        for symbol in ["BTC", "ETH"] {
            gateway.set_candles(symbol, "5", breakout_up());
            gateway.set_candles(symbol, "60", htf(107.0));
            gateway.set_candles(symbol, "240", htf(107.0));
        }
        gateway.set_price("BTC", 100.0);

        scanner.evaluate_symbol("BTC", t0()).await;
        let before = gateway.requests().len();
        scanner.run_cycle(t0() + ChronoDuration::seconds(5)).await.unwrap();

        let requests = gateway.requests()[before..].to_vec();
        assert_eq!(requests[0], "price BTC");
        assert!(requests[1..].iter().all(|r| r.starts_with("candles ETH")));
    }

    #[tokio::test]
    async fn test_capacity_stops_fetching() {
        let mut cfg = config(&["BTC", "ETH"]);
        cfg.max_trades = Some(1);
        let (mut scanner, gateway, _) = scanner(cfg);
        for symbol in ["BTC", "ETH"] {
            gateway.set_candles(symbol, "5", breakout_up());
            gateway.set_candles(symbol, "60", htf(107.0));
            gateway.set_candles(symbol, "240", htf(107.0));
        }

        let summary = scanner.run_cycle(t0()).await.unwrap();
        assert_eq!(summary.opened, 1);
        assert_eq!(scanner.evaluate_symbol("ETH", t0()).await, Evaluation::AtCapacity);
        assert!(!scanner.ledger().is_open("ETH"));
    }

    #[test]
    fn test_batch_rotation_covers_universe() {
        let symbols: Vec<String> = (0..7).map(|i| format!("S{}", i)).collect();
        let mut seen = Vec::new();
        for step in 0..3 {
            let now = t0() + ChronoDuration::seconds(60 * step);
            let batch = select_batch(&symbols, 3, 60, now).unwrap();
            assert!(batch.len() <= 3);
            seen.extend_from_slice(batch);
        }
        seen.sort();
        assert_eq!(seen, symbols);

        // same bucket, same batch
        let a = select_batch(&symbols, 3, 60, t0()).unwrap();
        let b = select_batch(&symbols, 3, 60, t0() + ChronoDuration::seconds(59)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_batch_errors() {
        assert!(select_batch(&[], 3, 60, t0()).is_err());
        assert!(select_batch(&["BTC".to_string()], 0, 60, t0()).is_err());
    }
}
