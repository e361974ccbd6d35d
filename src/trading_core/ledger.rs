//! Trade ledger
//!
//! Owns every open trade (at most one per symbol) and the per-symbol
//! cooldowns. All trade mutation goes through [`TradeLedger`]; each mutation
//! rewrites the on-disk ledger when a store is attached.
//!
//! Lifecycle per trade: `OPEN → TP1_HIT → TP2_HIT → CLOSED`. A management
//! pass first ratchets the trailing stop, then (once the minimum hold has
//! elapsed) checks the stop, then the targets in ascending order. Reaching
//! TP3 or the stop closes the trade, removes it and starts the cooldown.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::risk::RiskLevels;
use super::store::LedgerStore;
use crate::config::ScannerConfig;
use crate::types::Direction;

/// Lifecycle stage of an open trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    Open,
    Tp1Hit,
    Tp2Hit,
}

/// An open trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub side: Direction,
    pub entry: f64,
    /// ATR at entry; sets the trailing distance for the trade's lifetime
    pub atr: f64,
    /// Current (ratcheting) stop
    pub stop_loss: f64,
    pub initial_stop: f64,
    pub take_profits: [f64; 3],
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    pub opened_at: DateTime<Utc>,
}

impl Trade {
    pub fn state(&self) -> TradeState {
        if self.tp2_hit {
            TradeState::Tp2Hit
        } else if self.tp1_hit {
            TradeState::Tp1Hit
        } else {
            TradeState::Open
        }
    }

    /// Whether `price` has reached `level` in the trade's favor
    fn reached(&self, price: f64, level: f64) -> bool {
        match self.side {
            Direction::Long => price >= level,
            Direction::Short => price <= level,
        }
    }

    /// Whether `price` is at or through the current stop
    pub fn stop_breached(&self, price: f64) -> bool {
        match self.side {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }

    /// Tighten the stop toward `price` minus one trailing distance.
    ///
    /// Returns `(old, new)` when the stop moved. The stop never loosens.
    pub fn ratchet_stop(&mut self, price: f64, trail_multiplier: f64) -> Option<(f64, f64)> {
        let distance = self.atr * trail_multiplier;
        let candidate = match self.side {
            Direction::Long => self.stop_loss.max(price - distance),
            Direction::Short => self.stop_loss.min(price + distance),
        };

        if candidate != self.stop_loss {
            let old = self.stop_loss;
            self.stop_loss = candidate;
            Some((old, candidate))
        } else {
            None
        }
    }

    /// Unrealized move from entry in percent, positive in the trade's favor
    pub fn move_pct(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry) / self.entry * 100.0
    }

    /// Structural checks applied to records loaded from disk
    pub fn validate(&self) -> Result<()> {
        let prices = [self.entry, self.atr, self.stop_loss, self.initial_stop];
        if prices
            .iter()
            .chain(self.take_profits.iter())
            .any(|p| !p.is_finite() || *p <= 0.0)
        {
            bail!("non-finite or non-positive price field");
        }

        let [tp1, tp2, tp3] = self.take_profits;
        let ordered = match self.side {
            Direction::Long => self.entry < tp1 && tp1 < tp2 && tp2 < tp3,
            Direction::Short => self.entry > tp1 && tp1 > tp2 && tp2 > tp3,
        };
        if !ordered {
            bail!("take-profit levels not ordered in the {} direction", self.side);
        }

        if self.tp2_hit && !self.tp1_hit {
            bail!("tp2 marked hit without tp1");
        }

        Ok(())
    }
}

/// Why a trade closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    StopLoss,
    FinalTarget,
}

impl CloseReason {
    pub fn is_win(self) -> bool {
        matches!(self, CloseReason::FinalTarget)
    }
}

/// Something that happened to a trade during a ledger operation
#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    StopRaised {
        symbol: String,
        from: f64,
        to: f64,
    },
    TakeProfitHit {
        symbol: String,
        level: usize,
        price: f64,
    },
    Closed {
        trade: Trade,
        reason: CloseReason,
        price: f64,
    },
}

impl TradeEvent {
    /// Notification text, `None` for events that are only logged
    pub fn message(&self) -> Option<String> {
        match self {
            TradeEvent::StopRaised { .. } => None,
            TradeEvent::TakeProfitHit { symbol, level, price } => {
                let medal = if *level == 1 { "🥇" } else { "🥈" };
                Some(format!("{} TP{} HIT {} @ {:.4}", medal, level, symbol, price))
            }
            TradeEvent::Closed { trade, reason, price } => Some(match reason {
                CloseReason::StopLoss => format!(
                    "❌ SL HIT {} @ {:.4} ({:+.2}%)",
                    trade.symbol,
                    price,
                    trade.move_pct(*price)
                ),
                CloseReason::FinalTarget => format!(
                    "✅ TP3 HIT {} @ {:.4} ({:+.2}%)",
                    trade.symbol,
                    price,
                    trade.move_pct(*price)
                ),
            }),
        }
    }
}

/// Result of an open attempt
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened(Trade),
    AlreadyOpen,
    CoolingDown { until: DateTime<Utc> },
    AtCapacity { open: usize },
    /// Levels the on-disk schema would reject
    InvalidLevels { reason: String },
}

/// Ledger rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerPolicy {
    pub trail_multiplier: f64,
    pub min_hold: Duration,
    pub cooldown: Duration,
    /// `None` is unbounded
    pub max_trades: Option<usize>,
}

impl LedgerPolicy {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            trail_multiplier: config.risk.trail_multiplier,
            min_hold: config.min_hold(),
            cooldown: config.cooldown(),
            max_trades: config.max_trades,
        }
    }
}

/// Authoritative symbol → trade / cooldown state
#[derive(Debug)]
pub struct TradeLedger {
    trades: BTreeMap<String, Trade>,
    cooldowns: BTreeMap<String, DateTime<Utc>>,
    policy: LedgerPolicy,
    store: Option<LedgerStore>,
    /// Last write failed; the next mutation retries it
    pending_write: bool,
}

impl TradeLedger {
    /// In-memory ledger with no backing file
    pub fn new(policy: LedgerPolicy) -> Self {
        Self {
            trades: BTreeMap::new(),
            cooldowns: BTreeMap::new(),
            policy,
            store: None,
            pending_write: false,
        }
    }

    /// Restore the ledger from `store`, dropping invalid records and expired
    /// cooldowns. The cleaned state is written back when anything was dropped.
    pub fn load(policy: LedgerPolicy, store: LedgerStore, now: DateTime<Utc>) -> Result<Self> {
        let snapshot = store.load(now)?;
        let cleaned = snapshot.discarded > 0;

        info!(
            "Ledger restored from {:?}: {} open trades, {} cooldowns ({} records discarded)",
            store.path(),
            snapshot.trades.len(),
            snapshot.cooldowns.len(),
            snapshot.discarded
        );

        let mut ledger = Self {
            trades: snapshot.trades,
            cooldowns: snapshot.cooldowns,
            policy,
            store: Some(store),
            pending_write: false,
        };

        if cleaned {
            ledger.persist();
        }

        Ok(ledger)
    }

    pub fn get(&self, symbol: &str) -> Option<&Trade> {
        self.trades.get(symbol)
    }

    pub fn is_open(&self, symbol: &str) -> bool {
        self.trades.contains_key(symbol)
    }

    /// Open trades ordered by symbol
    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.values()
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.trades.keys().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.trades.len()
    }

    pub fn at_capacity(&self) -> bool {
        self.policy
            .max_trades
            .is_some_and(|cap| self.trades.len() >= cap)
    }

    /// Cooldowns, including any that expired since the last purge
    pub fn cooldowns(&self) -> impl Iterator<Item = (&String, &DateTime<Utc>)> {
        self.cooldowns.iter()
    }

    /// End of the symbol's active cooldown, if it has one
    pub fn cooldown_until(&self, symbol: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cooldowns.get(symbol).copied().filter(|until| *until > now)
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending_write
    }

    /// Drop cooldowns that have elapsed. Returns how many were removed.
    pub fn purge_expired_cooldowns(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.cooldowns.len();
        self.cooldowns.retain(|_, until| *until > now);
        let purged = before - self.cooldowns.len();

        if purged > 0 {
            debug!("Purged {} expired cooldowns", purged);
            self.persist();
        }
        purged
    }

    /// Open a trade for `symbol` at the given levels.
    ///
    /// Refused when the symbol already has a trade, is cooling down, the
    /// ledger is at capacity, or the levels fail the checks applied on load.
    pub fn open(&mut self, symbol: &str, levels: &RiskLevels, now: DateTime<Utc>) -> OpenOutcome {
        if self.is_open(symbol) {
            return OpenOutcome::AlreadyOpen;
        }
        if let Some(until) = self.cooldown_until(symbol, now) {
            return OpenOutcome::CoolingDown { until };
        }
        if self.at_capacity() {
            return OpenOutcome::AtCapacity {
                open: self.trades.len(),
            };
        }

        let trade = Trade {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side: levels.direction,
            entry: levels.entry,
            atr: levels.atr,
            stop_loss: levels.stop_loss,
            initial_stop: levels.stop_loss,
            take_profits: levels.take_profits,
            tp1_hit: false,
            tp2_hit: false,
            opened_at: now,
        };

        if let Err(e) = trade.validate() {
            warn!("Refusing to open {}: {:#}", symbol, e);
            return OpenOutcome::InvalidLevels {
                reason: format!("{:#}", e),
            };
        }

        info!(
            "OPEN {} {} @ {:.4} | SL {:.4} | TP {:.4} / {:.4} / {:.4} | ATR {:.4}",
            trade.side,
            symbol,
            trade.entry,
            trade.stop_loss,
            trade.take_profits[0],
            trade.take_profits[1],
            trade.take_profits[2],
            trade.atr
        );

        self.cooldowns.remove(symbol);
        self.trades.insert(symbol.to_string(), trade.clone());
        self.persist();

        OpenOutcome::Opened(trade)
    }

    /// Run one management step for `symbol` at the latest `price`.
    pub fn manage(&mut self, symbol: &str, price: f64, now: DateTime<Utc>) -> Vec<TradeEvent> {
        if !price.is_finite() || price <= 0.0 {
            warn!("Ignoring invalid price {} for {}", price, symbol);
            return Vec::new();
        }

        let trail_multiplier = self.policy.trail_multiplier;
        let min_hold = self.policy.min_hold;
        let Some(trade) = self.trades.get_mut(symbol) else {
            return Vec::new();
        };

        let mut events = Vec::new();

        if let Some((from, to)) = trade.ratchet_stop(price, trail_multiplier) {
            debug!("{} stop ratcheted {:.4} -> {:.4}", symbol, from, to);
            events.push(TradeEvent::StopRaised {
                symbol: symbol.to_string(),
                from,
                to,
            });
        }

        let mut close_reason = None;
        if now - trade.opened_at < min_hold {
            debug!("{} inside minimum hold, exit checks skipped", symbol);
        } else if trade.stop_breached(price) {
            close_reason = Some(CloseReason::StopLoss);
        } else {
            for level in 1..=3 {
                let target = trade.take_profits[level - 1];
                let already_hit = match level {
                    1 => trade.tp1_hit,
                    2 => trade.tp2_hit,
                    _ => false,
                };
                if already_hit || !trade.reached(price, target) {
                    continue;
                }

                if level == 3 {
                    close_reason = Some(CloseReason::FinalTarget);
                    break;
                }

                if level == 1 {
                    trade.tp1_hit = true;
                } else {
                    trade.tp2_hit = true;
                }
                info!("TP{} HIT {} @ {:.4} (target {:.4})", level, symbol, price, target);
                events.push(TradeEvent::TakeProfitHit {
                    symbol: symbol.to_string(),
                    level,
                    price,
                });
            }
        }

        match close_reason {
            Some(reason) => {
                if let Some(event) = self.close(symbol, reason, price, now) {
                    events.push(event);
                }
            }
            None if !events.is_empty() => self.persist(),
            None => {}
        }

        events
    }

    /// Close and remove the symbol's trade, starting its cooldown
    pub fn close(
        &mut self,
        symbol: &str,
        reason: CloseReason,
        price: f64,
        now: DateTime<Utc>,
    ) -> Option<TradeEvent> {
        let trade = self.trades.remove(symbol)?;
        let until = now + self.policy.cooldown;
        self.cooldowns.insert(symbol.to_string(), until);

        info!(
            "CLOSE {} {} @ {:.4} | {:?} | {:+.2}% | cooldown until {}",
            trade.side,
            symbol,
            price,
            reason,
            trade.move_pct(price),
            until.format("%H:%M:%S")
        );

        self.persist();

        Some(TradeEvent::Closed {
            trade,
            reason,
            price,
        })
    }

    /// Write the full ledger to the attached store. Failures are logged and
    /// retried on the next mutation; in-memory state is never rolled back.
    fn persist(&mut self) {
        let Some(store) = &self.store else {
            return;
        };

        match store.save(&self.trades, &self.cooldowns) {
            Ok(()) => {
                if self.pending_write {
                    info!("Ledger write recovered");
                }
                self.pending_write = false;
            }
            Err(e) => {
                warn!("Failed to persist ledger to {:?}: {:#}", store.path(), e);
                self.pending_write = true;
            }
        }
    }
}
