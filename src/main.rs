use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use structure_scanner::bybit::BybitClient;
use structure_scanner::config::{RiskParams, ScannerConfig, DEFAULT_SYMBOLS};
use structure_scanner::scanner::Scanner;
use structure_scanner::telegram::Notifier;
use structure_scanner::trading_core::{LedgerPolicy, LedgerStore, StatsBook, TradeLedger};

#[derive(Parser, Debug)]
#[command(name = "structure-scanner")]
#[command(author, version, about = "Market-structure signal scanner for USDT perpetuals")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Print debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Load the whole scanner configuration from a JSON file (flags below are ignored)
    #[arg(long, env = "SCANNER_CONFIG")]
    config: Option<PathBuf>,

    /// Open trades and cooldowns
    #[arg(long, env = "LEDGER_PATH", default_value = "trades.json")]
    ledger_path: PathBuf,

    /// Win/loss statistics
    #[arg(long, env = "STATS_PATH", default_value = "stats.json")]
    stats_path: PathBuf,

    /// Per-request HTTP timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "10")]
    http_timeout_secs: u64,

    /// Replace the universe with the top N USDT perpetuals by 24h turnover
    #[arg(long, env = "DISCOVER_TOP")]
    discover_top: Option<usize>,

    /// Minimum 24h turnover (USDT) for discovered symbols
    #[arg(long, env = "MIN_TURNOVER", default_value = "0")]
    min_turnover: f64,

    /// Candles behind the signal candle for break-of-structure and trend bias
    #[arg(long, env = "STRUCTURE_LOOKBACK", default_value = "20")]
    structure_lookback: usize,

    /// Candles inspected for a liquidity sweep
    #[arg(long, env = "LIQUIDITY_LOOKBACK", default_value = "10")]
    liquidity_lookback: usize,

    /// Initial stop distance in ATRs
    #[arg(long, env = "STOP_MULTIPLIER", default_value = "1.5")]
    stop_multiplier: f64,

    /// Trailing stop distance in ATRs
    #[arg(long, env = "TRAIL_MULTIPLIER", default_value = "1.0")]
    trail_multiplier: f64,

    /// TP1,TP2,TP3 distances in ATRs
    #[arg(long, env = "REWARD_MULTIPLES", value_delimiter = ',', default_value = "1.0,2.0,3.0")]
    reward_multiples: Vec<f64>,

    /// Partial-exit weights per target (reported only)
    #[arg(long, env = "EXIT_WEIGHTS", value_delimiter = ',', default_value = "0.3,0.3,0.4")]
    exit_weights: Vec<f64>,

    /// Seconds between cycles
    #[arg(long, env = "SCAN_INTERVAL_SECS", default_value = "60")]
    scan_interval_secs: u64,

    /// Seconds to wait after a failed cycle
    #[arg(long, env = "FAILURE_BACKOFF_SECS", default_value = "10")]
    failure_backoff_secs: u64,

    /// Seconds after opening before exits are checked
    #[arg(long, env = "MIN_HOLD_SECS", default_value = "60")]
    min_hold_secs: u64,

    /// Seconds a symbol is locked out after its trade closes
    #[arg(long, env = "COOLDOWN_SECS", default_value = "1800")]
    cooldown_secs: u64,

    /// Symbols evaluated per cycle
    #[arg(long, env = "BATCH_SIZE", default_value = "20")]
    batch_size: usize,

    /// Rotation bucket width in seconds (defaults to the scan interval)
    #[arg(long, env = "BATCH_PERIOD_SECS")]
    batch_period_secs: Option<u64>,

    /// Maximum concurrent open trades
    #[arg(long, env = "MAX_TRADES")]
    max_trades: Option<usize>,

    /// Reject signals whose absolute funding rate is above this
    #[arg(long, env = "MAX_FUNDING_RATE")]
    max_funding_rate: Option<f64>,

    /// Symbol universe, base tickers (comma-separated)
    #[arg(long, env = "SYMBOLS", value_delimiter = ',')]
    symbols: Option<Vec<String>>,

    /// Entry timeframe
    #[arg(long, env = "LTF_INTERVAL", default_value = "5")]
    ltf_interval: String,

    /// Trend timeframes, shortest to longest (comma-separated)
    #[arg(long, env = "HTF_INTERVALS", value_delimiter = ',', default_value = "60,240")]
    htf_intervals: Vec<String>,

    /// Candles requested per window
    #[arg(long, env = "CANDLE_LIMIT", default_value = "200")]
    candle_limit: usize,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan continuously (default)
    Run,

    /// Run a single cycle and exit
    Once,

    /// Print open trades, cooldowns and statistics
    Status,
}

fn triple(values: &[f64], name: &str) -> Result<[f64; 3]> {
    match values {
        [a, b, c] => Ok([*a, *b, *c]),
        _ => bail!("--{} takes exactly three values, got {}", name, values.len()),
    }
}

fn build_config(args: &Args) -> Result<ScannerConfig> {
    if let Some(path) = &args.config {
        info!("Loading configuration from {:?}", path);
        return ScannerConfig::from_json_file(path);
    }

    Ok(ScannerConfig {
        structure_lookback: args.structure_lookback,
        liquidity_lookback: args.liquidity_lookback,
        risk: RiskParams {
            stop_multiplier: args.stop_multiplier,
            trail_multiplier: args.trail_multiplier,
            reward_multiples: triple(&args.reward_multiples, "reward-multiples")?,
            exit_weights: triple(&args.exit_weights, "exit-weights")?,
        },
        scan_interval_secs: args.scan_interval_secs,
        failure_backoff_secs: args.failure_backoff_secs,
        min_hold_secs: args.min_hold_secs,
        cooldown_secs: args.cooldown_secs,
        batch_size: args.batch_size,
        batch_period_secs: args.batch_period_secs,
        max_trades: args.max_trades,
        max_funding_rate: args.max_funding_rate,
        symbols: match &args.symbols {
            Some(symbols) => symbols
                .iter()
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        },
        ltf_interval: args.ltf_interval.trim().to_string(),
        htf_intervals: args.htf_intervals.iter().map(|s| s.trim().to_string()).collect(),
        candle_limit: args.candle_limit,
    })
}

fn print_status(ledger: &TradeLedger, stats: &StatsBook) {
    let now = Utc::now();

    println!("=== OPEN TRADES ({}) ===", ledger.open_count());
    for trade in ledger.trades() {
        let age = now - trade.opened_at;
        println!(
            "{:<10} {:<5} entry {:.4} | SL {:.4} (initial {:.4}) | TP {:.4} / {:.4} / {:.4} | {:?} | {}m old",
            trade.symbol,
            trade.side,
            trade.entry,
            trade.stop_loss,
            trade.initial_stop,
            trade.take_profits[0],
            trade.take_profits[1],
            trade.take_profits[2],
            trade.state(),
            age.num_minutes()
        );
    }

    let cooldowns: Vec<_> = ledger.cooldowns().filter(|(_, until)| **until > now).collect();
    println!();
    println!("=== COOLDOWNS ({}) ===", cooldowns.len());
    for (symbol, until) in cooldowns {
        println!(
            "{:<10} until {} ({}m left)",
            symbol,
            until.format("%Y-%m-%d %H:%M:%S UTC"),
            (*until - now).num_minutes()
        );
    }

    let totals = stats.totals();
    println!();
    println!(
        "=== STATS: {} wins / {} losses ({:.1}% win rate) ===",
        totals.wins,
        totals.losses,
        totals.win_rate() * 100.0
    );
    for (symbol, s) in stats.iter() {
        println!(
            "{:<10} {:>3}W {:>3}L  {:.1}%",
            symbol,
            s.wins,
            s.losses,
            s.win_rate() * 100.0
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("structure_scanner={}", default_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = build_config(&args)?;
    let policy = LedgerPolicy::from_config(&config);

    let ledger = TradeLedger::load(policy, LedgerStore::new(&args.ledger_path), Utc::now())
        .context("Failed to load trade ledger")?;
    let stats = StatsBook::load(&args.stats_path);

    let command = args.command.as_ref().unwrap_or(&Commands::Run);
    if matches!(command, Commands::Status) {
        print_status(&ledger, &stats);
        return Ok(());
    }

    let client = BybitClient::from_env(Duration::from_secs(args.http_timeout_secs))?;

    if let Some(top_n) = args.discover_top {
        match client.top_symbols_by_turnover(top_n, args.min_turnover).await {
            Ok(symbols) if !symbols.is_empty() => {
                info!("Discovered {} symbols by turnover", symbols.len());
                config.symbols = symbols;
            }
            Ok(_) => warn!("Discovery returned no symbols; keeping configured universe"),
            Err(e) => warn!("Discovery failed, keeping configured universe: {:#}", e),
        }
    }

    config.validate()?;

    info!("Starting structure scanner");
    info!("Universe: {} symbols", config.symbols.len());
    info!(
        "Timeframes: LTF {} | HTF {}",
        config.ltf_interval,
        config.htf_intervals.join(",")
    );
    info!(
        "Structure {} | Liquidity {} | SL {}x ATR | Trail {}x ATR | Max trades {:?}",
        config.structure_lookback,
        config.liquidity_lookback,
        config.risk.stop_multiplier,
        config.risk.trail_multiplier,
        config.max_trades
    );

    let notifier = Notifier::from_env()?;
    let mut scanner = Scanner::new(config, client, notifier, ledger, stats);

    match command {
        Commands::Once => {
            let summary = scanner.run_cycle(Utc::now()).await?;
            info!("Single cycle complete: {:?}", summary);
        }
        _ => scanner.run().await,
    }

    Ok(())
}
