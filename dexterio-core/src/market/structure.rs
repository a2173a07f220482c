//! Swing-pivot structure detection and ATR.

use crate::domain::{Bar, Structure};

/// A confirmed swing pivot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pivot {
    pub index: usize,
    pub price: f64,
}

/// Confirmed pivot highs and lows over a candle slice.
///
/// A pivot requires `lookback` candles on each side strictly below (highs)
/// or above (lows) it, so the last `lookback` candles can never confirm one.
pub fn pivot_points(candles: &[Bar], lookback: usize) -> (Vec<Pivot>, Vec<Pivot>) {
    let mut highs = Vec::new();
    let mut lows = Vec::new();

    if candles.len() < 2 * lookback + 1 {
        return (highs, lows);
    }

    for i in lookback..candles.len() - lookback {
        let h = candles[i].high;
        let l = candles[i].low;

        let is_high = (i - lookback..=i + lookback).all(|j| j == i || candles[j].high < h);
        if is_high {
            highs.push(Pivot { index: i, price: h });
        }

        let is_low = (i - lookback..=i + lookback).all(|j| j == i || candles[j].low > l);
        if is_low {
            lows.push(Pivot { index: i, price: l });
        }
    }

    (highs, lows)
}

/// Classify structure from the last few swing pivots.
///
/// Fewer than 20 candles is not enough evidence and yields `Unknown`.
/// Uptrend requires the recent pivot highs and lows to both be strictly
/// ascending; downtrend the mirror; anything else is a range.
pub fn detect_structure(candles: &[Bar]) -> Structure {
    if candles.len() < 20 {
        return Structure::Unknown;
    }

    let (highs, lows) = pivot_points(candles, 3);
    if highs.len() < 2 || lows.len() < 2 {
        return Structure::Range;
    }

    let recent_highs: Vec<f64> = highs.iter().rev().take(3).rev().map(|p| p.price).collect();
    let recent_lows: Vec<f64> = lows.iter().rev().take(3).rev().map(|p| p.price).collect();

    let ascending = |v: &[f64]| v.windows(2).all(|w| w[1] > w[0]);
    let descending = |v: &[f64]| v.windows(2).all(|w| w[1] < w[0]);

    if ascending(&recent_highs) && ascending(&recent_lows) {
        Structure::Uptrend
    } else if descending(&recent_highs) && descending(&recent_lows) {
        Structure::Downtrend
    } else {
        Structure::Range
    }
}

/// Average true range over the trailing `period` candles. Returns 0 when
/// there is not enough history.
pub fn atr(candles: &[Bar], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return 0.0;
    }
    let start = candles.len() - period;
    let mut sum = 0.0;
    for i in start..candles.len() {
        let prev_close = candles[i - 1].close;
        let tr = (candles[i].high - candles[i].low)
            .max((candles[i].high - prev_close).abs())
            .max((candles[i].low - prev_close).abs());
        sum += tr;
    }
    sum / period as f64
}
