use serde::{Deserialize, Serialize};

/// One OHLCV bar. Windows are always ordered oldest → newest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in unix milliseconds
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// True range against the previous bar's close
    pub fn true_range(&self, prev_close: f64) -> f64 {
        (self.high - self.low)
            .max((self.high - prev_close).abs())
            .max((self.low - prev_close).abs())
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short. Multiplying a distance by this moves it
    /// in the trade's favorable direction.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Order-side wording used in notifications
    pub fn action(self) -> &'static str {
        match self {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Higher-timeframe bias classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Bull,
    Bear,
    Range,
}

impl Bias {
    /// Whether a signal in `direction` trades against this bias
    pub fn opposes(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Bias::Bull, Direction::Short) | (Bias::Bear, Direction::Long)
        )
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bias::Bull => write!(f, "BULL"),
            Bias::Bear => write!(f, "BEAR"),
            Bias::Range => write!(f, "RANGE"),
        }
    }
}

/// Which price-action pattern produced a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    BreakOfStructure,
    LiquiditySweep,
}

/// Directional signal fired on the final candle of a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub direction: Direction,
    /// The rolling extreme that was broken or swept
    pub level: f64,
    /// Close of the signal candle
    pub price: f64,
}

impl Signal {
    /// Short label, e.g. "BOS BUY" or "SWEEP HIGH SELL"
    pub fn label(&self) -> String {
        match (self.kind, self.direction) {
            (SignalKind::BreakOfStructure, d) => format!("BOS {}", d.action()),
            (SignalKind::LiquiditySweep, Direction::Long) => "SWEEP LOW BUY".to_string(),
            (SignalKind::LiquiditySweep, Direction::Short) => "SWEEP HIGH SELL".to_string(),
        }
    }
}

/// Outcome of running the signal detector over a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detection {
    Signal(Signal),
    NoSignal,
    /// Window shorter than the detector needs; skip this symbol this cycle
    InsufficientData { have: usize, need: usize },
}

impl Detection {
    pub fn signal(&self) -> Option<Signal> {
        match self {
            Detection::Signal(s) => Some(*s),
            _ => None,
        }
    }
}
