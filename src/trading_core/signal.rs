//! Price-action signal detection
//!
//! Two patterns are evaluated on the final candle of a window:
//!
//! - **Break of structure**: close strictly beyond the highest high / lowest
//!   low of the `structure_lookback` candles before it (continuation).
//! - **Liquidity sweep**: the final candle wicks past the extreme of the
//!   preceding `liquidity_lookback - 1` candles and closes back inside
//!   (reversal).
//!
//! Break of structure wins when both fire.

use crate::types::{Candle, Detection, Direction, Signal, SignalKind};

/// Highest high and lowest low over a slice
fn extremes(candles: &[Candle]) -> (f64, f64) {
    let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    (high, low)
}

/// Candles `detect` needs for the given lookbacks
pub fn required_candles(structure_lookback: usize, liquidity_lookback: usize) -> usize {
    (structure_lookback + 1).max(liquidity_lookback)
}

/// Break of structure on the final candle, if any
pub fn break_of_structure(candles: &[Candle], lookback: usize) -> Option<Signal> {
    let (last, prior) = candles.split_last()?;
    if lookback == 0 || prior.len() < lookback {
        return None;
    }

    let (high, low) = extremes(&prior[prior.len() - lookback..]);

    if last.close > high {
        Some(Signal {
            kind: SignalKind::BreakOfStructure,
            direction: Direction::Long,
            level: high,
            price: last.close,
        })
    } else if last.close < low {
        Some(Signal {
            kind: SignalKind::BreakOfStructure,
            direction: Direction::Short,
            level: low,
            price: last.close,
        })
    } else {
        None
    }
}

/// Liquidity sweep on the final candle of the last `lookback` candles
pub fn liquidity_sweep(candles: &[Candle], lookback: usize) -> Option<Signal> {
    if lookback < 2 || candles.len() < lookback {
        return None;
    }

    let window = &candles[candles.len() - lookback..];
    let (last, prior) = window.split_last()?;
    let (high, low) = extremes(prior);

    if last.high > high && last.close < high {
        Some(Signal {
            kind: SignalKind::LiquiditySweep,
            direction: Direction::Short,
            level: high,
            price: last.close,
        })
    } else if last.low < low && last.close > low {
        Some(Signal {
            kind: SignalKind::LiquiditySweep,
            direction: Direction::Long,
            level: low,
            price: last.close,
        })
    } else {
        None
    }
}

/// Run both detectors over a window, break of structure first
pub fn detect(candles: &[Candle], structure_lookback: usize, liquidity_lookback: usize) -> Detection {
    let need = required_candles(structure_lookback, liquidity_lookback);
    if candles.len() < need {
        return Detection::InsufficientData {
            have: candles.len(),
            need,
        };
    }

    if let Some(signal) = break_of_structure(candles, structure_lookback) {
        return Detection::Signal(signal);
    }

    match liquidity_sweep(candles, liquidity_lookback) {
        Some(signal) => Detection::Signal(signal),
        None => Detection::NoSignal,
    }
}
