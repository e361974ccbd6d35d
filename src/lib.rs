// Library crate - exports the strategy core, venue clients and the scanner

pub mod types;
pub mod config;
pub mod trading_core;
pub mod gateway;
pub mod bybit;
pub mod telegram;
pub mod scanner;

// Re-export commonly used types
pub use types::*;
pub use config::{RiskParams, ScannerConfig};
pub use gateway::{MarketDataGateway, NotificationSink};
pub use scanner::{CycleSummary, Evaluation, Scanner};
