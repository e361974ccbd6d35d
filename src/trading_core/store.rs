//! On-disk ledger
//!
//! JSON document with a schema version, the open trades keyed by symbol and
//! the active cooldowns. Records are validated one by one on load so a single
//! bad entry does not take the rest of the ledger down with it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::ledger::Trade;

/// Current ledger schema version
pub const LEDGER_VERSION: u32 = 1;

#[derive(Serialize)]
struct LedgerFile<'a> {
    version: u32,
    trades: &'a BTreeMap<String, Trade>,
    cooldowns: &'a BTreeMap<String, DateTime<Utc>>,
}

/// Loosely typed view used while validating a file
#[derive(Deserialize)]
struct RawLedgerFile {
    version: Option<u32>,
    #[serde(default)]
    trades: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    cooldowns: BTreeMap<String, serde_json::Value>,
}

/// Validated ledger contents
#[derive(Debug, Default)]
pub struct LedgerSnapshot {
    pub trades: BTreeMap<String, Trade>,
    pub cooldowns: BTreeMap<String, DateTime<Utc>>,
    /// Trades, cooldowns or whole files dropped during validation
    pub discarded: usize,
}

/// Write `value` as pretty JSON via a temp file and rename
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

/// Ledger file location
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(
        &self,
        trades: &BTreeMap<String, Trade>,
        cooldowns: &BTreeMap<String, DateTime<Utc>>,
    ) -> Result<()> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            trades,
            cooldowns,
        };
        write_json_atomic(&self.path, &file)
    }

    /// Read and validate the ledger.
    ///
    /// A missing file is an empty ledger. An unparseable file or unknown
    /// version is moved aside to `<path>.corrupt` and also yields an empty
    /// ledger. Only I/O errors reading an existing file are returned.
    pub fn load(&self, now: DateTime<Utc>) -> Result<LedgerSnapshot> {
        if !self.path.exists() {
            return Ok(LedgerSnapshot::default());
        }

        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read ledger {:?}", self.path))?;

        let file: RawLedgerFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!("Ledger {:?} is not valid JSON ({}), starting empty", self.path, e);
                self.quarantine();
                return Ok(LedgerSnapshot {
                    discarded: 1,
                    ..Default::default()
                });
            }
        };

        if file.version != Some(LEDGER_VERSION) {
            warn!(
                "Ledger {:?} has schema version {:?}, expected {}; starting empty",
                self.path, file.version, LEDGER_VERSION
            );
            self.quarantine();
            return Ok(LedgerSnapshot {
                discarded: 1,
                ..Default::default()
            });
        }

        let mut snapshot = LedgerSnapshot::default();

        for (symbol, value) in file.trades {
            match parse_trade(&symbol, value) {
                Ok(trade) => {
                    snapshot.trades.insert(symbol, trade);
                }
                Err(e) => {
                    warn!("Discarding ledger record for {}: {:#}", symbol, e);
                    snapshot.discarded += 1;
                }
            }
        }

        for (symbol, value) in file.cooldowns {
            match serde_json::from_value::<DateTime<Utc>>(value) {
                Ok(until) if until > now && !snapshot.trades.contains_key(&symbol) => {
                    snapshot.cooldowns.insert(symbol, until);
                }
                Ok(_) => snapshot.discarded += 1,
                Err(e) => {
                    warn!("Discarding cooldown for {}: {}", symbol, e);
                    snapshot.discarded += 1;
                }
            }
        }

        Ok(snapshot)
    }

    fn quarantine(&self) {
        let mut aside = self.path.as_os_str().to_owned();
        aside.push(".corrupt");
        if let Err(e) = std::fs::rename(&self.path, &aside) {
            warn!("Could not move {:?} aside: {}", self.path, e);
        }
    }
}

fn parse_trade(symbol: &str, value: serde_json::Value) -> Result<Trade> {
    let trade: Trade = serde_json::from_value(value).context("malformed trade record")?;
    if trade.symbol != symbol {
        anyhow::bail!("record symbol {} does not match key", trade.symbol);
    }
    trade.validate()?;
    Ok(trade)
}
