//! Volatility-based risk levels
//!
//! ATR is the mean true range of the [`ATR_PERIOD`] candles that precede the
//! signal candle. Stops, targets and the trailing distance are all ATR
//! multiples measured from the entry (the signal candle's close).

use serde::{Deserialize, Serialize};

use crate::config::RiskParams;
use crate::types::{Candle, Direction};

/// True ranges averaged for ATR
pub const ATR_PERIOD: usize = 14;

/// Mean true range of the last [`ATR_PERIOD`] candles of `candles`.
///
/// Each true range needs the previous close, so at least `ATR_PERIOD + 1`
/// candles are required; shorter windows yield `None`.
pub fn atr(candles: &[Candle]) -> Option<f64> {
    if candles.len() < ATR_PERIOD + 1 {
        return None;
    }

    let window = &candles[candles.len() - (ATR_PERIOD + 1)..];
    let sum: f64 = window
        .windows(2)
        .map(|pair| pair[1].true_range(pair[0].close))
        .sum();

    Some(sum / ATR_PERIOD as f64)
}

/// Entry, stop and target prices for a new trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLevels {
    pub direction: Direction,
    pub entry: f64,
    pub atr: f64,
    /// Initial stop-loss
    pub stop_loss: f64,
    /// TP1..TP3, progressively further in the favorable direction
    pub take_profits: [f64; 3],
    /// Position fraction conventionally closed at each target
    pub exit_weights: [f64; 3],
    /// Entry minus one trailing distance; first candidate of the ratchet
    pub trail_seed: f64,
}

/// Price `multiple` ATRs from `entry`, positive multiples toward profit
fn offset(entry: f64, direction: Direction, atr: f64, multiple: f64) -> f64 {
    entry + direction.sign() * atr * multiple
}

/// Levels for `direction` entered at the close of the window's last candle.
///
/// Needs `ATR_PERIOD + 2` candles: the signal candle plus the ATR window
/// behind it. Also `None` for a degenerate (zero or non-finite) ATR, and when
/// the stop or a target would land at or below zero.
pub fn compute_levels(candles: &[Candle], direction: Direction, params: &RiskParams) -> Option<RiskLevels> {
    let (signal, prior) = candles.split_last()?;
    let atr = atr(prior)?;
    if !atr.is_finite() || atr <= 0.0 {
        return None;
    }

    let entry = signal.close;
    let [r1, r2, r3] = params.reward_multiples;

    let levels = RiskLevels {
        direction,
        entry,
        atr,
        stop_loss: offset(entry, direction, atr, -params.stop_multiplier),
        take_profits: [
            offset(entry, direction, atr, r1),
            offset(entry, direction, atr, r2),
            offset(entry, direction, atr, r3),
        ],
        exit_weights: params.exit_weights,
        trail_seed: offset(entry, direction, atr, -params.trail_multiplier),
    };

    let priced = std::iter::once(levels.stop_loss)
        .chain(levels.take_profits)
        .all(|p| p.is_finite() && p > 0.0);
    priced.then_some(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::signal;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            open: close,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn test_atr_requires_fifteen() {
        let bars: Vec<Candle> = (0..14).map(|_| candle(105.0, 95.0, 100.0)).collect();
        assert_eq!(atr(&bars), None);

        let bars: Vec<Candle> = (0..15).map(|_| candle(105.0, 95.0, 100.0)).collect();
        assert_eq!(atr(&bars), Some(10.0));
    }

    #[test]
    fn test_atr_uses_gaps() {
        // each bar gaps 20 above the previous close with a 4 point body
        let bars: Vec<Candle> = (0..15)
            .map(|i| {
                let base = 100.0 + 20.0 * i as f64;
                candle(base + 2.0, base - 2.0, base)
            })
            .collect();
        // true range = |high - prev close| = 22
        assert!((atr(&bars).unwrap() - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_only_trailing_window() {
        let mut bars: Vec<Candle> = (0..10).map(|_| candle(150.0, 50.0, 100.0)).collect();
        bars.extend((0..15).map(|_| candle(105.0, 95.0, 100.0)));
        assert_eq!(atr(&bars), Some(10.0));
    }

    #[test]
    fn test_two_hundred_candle_breakout() {
        let mut bars: Vec<Candle> = (0..199).map(|_| candle(105.0, 95.0, 100.0)).collect();
        // close one unit above the prior 20-candle high
        bars.push(candle(106.5, 99.0, 106.0));

        let signal = signal::detect(&bars, 20, 10).signal().unwrap();
        assert_eq!(signal.direction, Direction::Long);

        let levels = compute_levels(&bars, signal.direction, &RiskParams::default()).unwrap();
        assert_eq!(levels.entry, 106.0);
        assert_eq!(levels.atr, 10.0);
        assert_eq!(levels.stop_loss, 106.0 - 15.0);
        assert_eq!(levels.take_profits, [116.0, 126.0, 136.0]);
        assert_eq!(levels.trail_seed, 96.0);
        assert_eq!(levels.exit_weights, [0.3, 0.3, 0.4]);
    }

    #[test]
    fn test_short_levels_mirror() {
        let mut bars: Vec<Candle> = (0..30).map(|_| candle(105.0, 95.0, 100.0)).collect();
        bars.push(candle(100.0, 93.0, 94.0));

        let levels = compute_levels(&bars, Direction::Short, &RiskParams::default()).unwrap();
        assert_eq!(levels.stop_loss, 94.0 + 15.0);
        assert_eq!(levels.take_profits, [84.0, 74.0, 64.0]);
        assert_eq!(levels.trail_seed, 104.0);
    }

    #[test]
    fn test_compute_levels_short_window() {
        let bars: Vec<Candle> = (0..15).map(|_| candle(105.0, 95.0, 100.0)).collect();
        assert!(compute_levels(&bars, Direction::Long, &RiskParams::default()).is_none());
    }

    #[test]
    fn test_levels_must_stay_positive() {
        // ATR 0.6 on a 0.8 close: a long stop would sit below zero
        let mut bars: Vec<Candle> = (0..20).map(|_| candle(1.3, 0.7, 1.0)).collect();
        bars.push(candle(1.0, 0.75, 0.8));
        assert!(compute_levels(&bars, Direction::Long, &RiskParams::default()).is_none());
        // and a short TP3 at 0.8 - 1.8
        assert!(compute_levels(&bars, Direction::Short, &RiskParams::default()).is_none());

        // a wide but still positive range is fine
        let mut bars: Vec<Candle> = (0..20).map(|_| candle(1.1, 0.9, 1.0)).collect();
        bars.push(candle(1.0, 0.75, 0.8));
        let levels = compute_levels(&bars, Direction::Long, &RiskParams::default()).unwrap();
        assert!(levels.stop_loss > 0.0);
    }

    #[test]
    fn test_flat_market_has_no_levels() {
        let bars: Vec<Candle> = (0..20).map(|_| candle(100.0, 100.0, 100.0)).collect();
        assert!(compute_levels(&bars, Direction::Long, &RiskParams::default()).is_none());
    }
}
