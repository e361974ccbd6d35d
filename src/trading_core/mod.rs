//! Trading Core - signal detection, risk sizing and the trade ledger
//!
//! Everything here is venue-agnostic:
//! - Break-of-structure and liquidity-sweep detection
//! - Higher-timeframe bias
//! - ATR-based stops and take-profit ladder
//! - Trade ledger state machine with cooldowns and persistence
//! - Win/loss statistics

pub mod signal;
pub mod trend;
pub mod risk;
pub mod ledger;
pub mod store;
pub mod stats;

// Re-export commonly used types
pub use risk::{RiskLevels, ATR_PERIOD};
pub use ledger::{CloseReason, LedgerPolicy, OpenOutcome, Trade, TradeEvent, TradeLedger, TradeState};
pub use store::LedgerStore;
pub use stats::{StatsBook, SymbolStats};
