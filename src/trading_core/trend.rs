//! Higher-timeframe bias
//!
//! A timeframe is BULL when its last close is above the highest high of the
//! preceding `lookback` candles, BEAR when below the lowest low, else RANGE.

use crate::types::{Bias, Candle};

/// Classify a higher-timeframe window. `None` when the window is too short.
pub fn classify(candles: &[Candle], lookback: usize) -> Option<Bias> {
    let (last, prior) = candles.split_last()?;
    if lookback == 0 || prior.len() < lookback {
        return None;
    }

    let window = &prior[prior.len() - lookback..];
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

    Some(if last.close > high {
        Bias::Bull
    } else if last.close < low {
        Bias::Bear
    } else {
        Bias::Range
    })
}

/// Bias that gates entries: the longest timeframe that is not ranging.
///
/// `biases` must be ordered shortest → longest timeframe. Returns `None`
/// when every timeframe is RANGE.
pub fn dominant_bias(biases: &[Bias]) -> Option<Bias> {
    biases.iter().rev().copied().find(|b| *b != Bias::Range)
}
