//! Per-symbol win/loss tally, persisted next to the ledger

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::store::write_json_atomic;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolStats {
    pub wins: u32,
    pub losses: u32,
}

impl SymbolStats {
    pub fn total(&self) -> u32 {
        self.wins + self.losses
    }

    pub fn win_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.wins as f64 / self.total() as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct StatsBook {
    path: Option<PathBuf>,
    by_symbol: BTreeMap<String, SymbolStats>,
}

impl StatsBook {
    /// Load from `path`; a missing or unreadable file starts a fresh tally
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let by_symbol = match read_stats(&path) {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Starting fresh stats, could not load {:?}: {:#}", path, e);
                BTreeMap::new()
            }
        };

        Self {
            path: Some(path),
            by_symbol,
        }
    }

    pub fn get(&self, symbol: &str) -> SymbolStats {
        self.by_symbol.get(symbol).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SymbolStats)> {
        self.by_symbol.iter()
    }

    pub fn totals(&self) -> SymbolStats {
        self.by_symbol.values().fold(SymbolStats::default(), |acc, s| SymbolStats {
            wins: acc.wins + s.wins,
            losses: acc.losses + s.losses,
        })
    }

    /// Count a closed trade and rewrite the stats file
    pub fn record(&mut self, symbol: &str, win: bool) {
        let entry = self.by_symbol.entry(symbol.to_string()).or_default();
        if win {
            entry.wins += 1;
        } else {
            entry.losses += 1;
        }

        if let Some(path) = &self.path {
            if let Err(e) = write_json_atomic(path, &self.by_symbol) {
                warn!("Failed to persist stats to {:?}: {:#}", path, e);
            }
        }
    }
}

fn read_stats(path: &Path) -> Result<BTreeMap<String, SymbolStats>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = std::fs::read_to_string(path).context("read failed")?;
    serde_json::from_str(&raw).context("parse failed")
}
