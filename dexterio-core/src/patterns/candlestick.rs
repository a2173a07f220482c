//! Candlestick pattern detection.
//!
//! Purely geometric predicates over the last one to three closed candles of
//! a window. Context flags (`at_level`, `after_sweep`) come from the
//! liquidity tracker and the recent sweep history.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Bar, Polarity};
use crate::market::liquidity::LiquidityTracker;
use crate::timeframe::Timeframe;

use super::{CandleFamily, CandlestickDetection};

/// A doji body is at most this fraction of the range.
const DOJI_BODY_MAX: f64 = 0.1;
/// `at_level` tolerance as a fraction of price.
const LEVEL_TOL: f64 = 0.001;
/// A sweep within this many minutes sets `after_sweep`.
const AFTER_SWEEP_WINDOW_MIN: i64 = 50;

/// Stateless candlestick detector (context is passed per call).
#[derive(Debug, Default)]
pub struct CandlestickEngine;

impl CandlestickEngine {
    pub fn new() -> Self {
        Self
    }

    /// Detect all families on the tail of `window`.
    pub fn detect(
        &self,
        window: &[Bar],
        tf: Timeframe,
        liquidity: &LiquidityTracker,
        last_sweep_ts: Option<DateTime<Utc>>,
    ) -> Vec<CandlestickDetection> {
        let n = window.len();
        if n == 0 {
            return Vec::new();
        }

        let c3 = &window[n - 1];
        let c2 = n.checked_sub(2).map(|i| &window[i]);
        let c1 = n.checked_sub(3).map(|i| &window[i]);

        let at_level = liquidity.level_near(c3.close, c3.close * LEVEL_TOL).is_some();
        let after_sweep = last_sweep_ts
            .map(|ts| c3.timestamp - ts <= Duration::minutes(AFTER_SWEEP_WINDOW_MIN))
            .unwrap_or(false);

        let mut raw: Vec<(CandleFamily, &'static str, Polarity, f64)> = Vec::new();

        Self::single(c3, c2, &mut raw);
        if let Some(c2) = c2 {
            Self::pairs(c2, c3, &mut raw);
        }
        if let (Some(c1), Some(c2)) = (c1, c2) {
            Self::triples(c1, c2, c3, &mut raw);
        }

        raw.into_iter()
            .map(|(family, name, direction, base)| {
                let strength = if at_level { (base * 1.2).min(1.0) } else { base };
                let confirmation = c3.body_ratio() >= 0.5
                    && match direction {
                        Polarity::Bullish => c3.is_bullish(),
                        Polarity::Bearish => c3.is_bearish(),
                    };
                CandlestickDetection {
                    family,
                    name: name.to_string(),
                    direction,
                    strength,
                    body_ratio: c3.body_ratio(),
                    confirmation,
                    at_level,
                    after_sweep,
                    timeframe: tf,
                    timestamp: c3.timestamp,
                }
            })
            .collect()
    }

    fn single(
        c: &Bar,
        prev: Option<&Bar>,
        out: &mut Vec<(CandleFamily, &'static str, Polarity, f64)>,
    ) {
        let body = c.body();
        let range = c.range();
        if range <= 0.0 {
            return;
        }

        // hammer: small body, long lower wick, negligible upper wick
        if body <= 0.33 * range && c.lower_wick() >= 2.0 * body && c.upper_wick() <= 0.1 * body.max(range * 0.05) {
            out.push((CandleFamily::Hammer, "hammer", Polarity::Bullish, 0.9));
        }
        // shooting star: the mirror
        if body <= 0.33 * range && c.upper_wick() >= 2.0 * body && c.lower_wick() <= 0.1 * body.max(range * 0.05) {
            out.push((CandleFamily::Hammer, "shooting_star", Polarity::Bearish, 0.9));
        }

        if body <= DOJI_BODY_MAX * range {
            if c.lower_wick() >= 2.0 * c.upper_wick() {
                out.push((CandleFamily::Doji, "dragonfly_doji", Polarity::Bullish, 0.7));
            } else if c.upper_wick() >= 2.0 * c.lower_wick() {
                out.push((CandleFamily::Doji, "gravestone_doji", Polarity::Bearish, 0.7));
            } else if let Some(prev) = prev {
                // standard doji reads as hesitation against the prior move
                let dir = if prev.is_bullish() { Polarity::Bearish } else { Polarity::Bullish };
                out.push((CandleFamily::Doji, "standard_doji", dir, 0.5));
            }
        }

        if body > 0.0 && c.upper_wick() <= 0.05 * body && c.lower_wick() <= 0.05 * body {
            if c.is_bullish() {
                out.push((CandleFamily::Marubozu, "marubozu_bullish", Polarity::Bullish, 0.7));
            } else if c.is_bearish() {
                out.push((CandleFamily::Marubozu, "marubozu_bearish", Polarity::Bearish, 0.7));
            }
        }

        // belt hold: opens on its extreme after a counter-directional candle
        if let Some(prev) = prev {
            if prev.is_bearish()
                && c.is_bullish()
                && c.lower_wick() <= 0.05 * body.max(range * 0.02)
                && c.body_ratio() >= 0.6
            {
                out.push((CandleFamily::BeltHold, "bullish_belt_hold", Polarity::Bullish, 0.65));
            }
            if prev.is_bullish()
                && c.is_bearish()
                && c.upper_wick() <= 0.05 * body.max(range * 0.02)
                && c.body_ratio() >= 0.6
            {
                out.push((CandleFamily::BeltHold, "bearish_belt_hold", Polarity::Bearish, 0.65));
            }
        }
    }

    fn pairs(c1: &Bar, c2: &Bar, out: &mut Vec<(CandleFamily, &'static str, Polarity, f64)>) {
        // engulfing: second body swallows the first
        if c1.is_bearish() && c2.is_bullish() && c2.open <= c1.close && c2.close >= c1.open && c2.body() > c1.body() {
            out.push((CandleFamily::Engulfing, "bullish_engulfing", Polarity::Bullish, 1.0));
        }
        if c1.is_bullish() && c2.is_bearish() && c2.open >= c1.close && c2.close <= c1.open && c2.body() > c1.body() {
            out.push((CandleFamily::Engulfing, "bearish_engulfing", Polarity::Bearish, 1.0));
        }

        // piercing line / dark cloud cover: gap open, close past the midpoint
        let mid1 = (c1.open + c1.close) / 2.0;
        if c1.is_bearish() && c2.is_bullish() && c2.open < c1.low && c2.close > mid1 {
            out.push((CandleFamily::Piercing, "piercing_line", Polarity::Bullish, 0.85));
        }
        if c1.is_bullish() && c2.is_bearish() && c2.open > c1.high && c2.close < mid1 {
            out.push((CandleFamily::Piercing, "dark_cloud_cover", Polarity::Bearish, 0.85));
        }

        // harami: second body inside the first
        if c1.is_bearish() && c2.is_bullish() && c2.open > c1.close && c2.close < c1.open {
            out.push((CandleFamily::Harami, "bullish_harami", Polarity::Bullish, 0.7));
        }
        if c1.is_bullish() && c2.is_bearish() && c2.open < c1.close && c2.close > c1.open {
            out.push((CandleFamily::Harami, "bearish_harami", Polarity::Bearish, 0.7));
        }

        // tweezer: matching extremes with reversing bodies
        let tol = c1.close * 0.0005;
        if c1.is_bearish() && c2.is_bullish() && (c1.low - c2.low).abs() <= tol {
            out.push((CandleFamily::Tweezer, "tweezer_bottom", Polarity::Bullish, 0.7));
        }
        if c1.is_bullish() && c2.is_bearish() && (c1.high - c2.high).abs() <= tol {
            out.push((CandleFamily::Tweezer, "tweezer_top", Polarity::Bearish, 0.7));
        }

        // kicker: gap open beyond the prior open with conviction
        if c1.is_bearish() && c2.is_bullish() && c2.open > c1.open && c2.body_ratio() >= 0.7 {
            out.push((CandleFamily::Kicker, "bullish_kicker", Polarity::Bullish, 0.9));
        }
        if c1.is_bullish() && c2.is_bearish() && c2.open < c1.open && c2.body_ratio() >= 0.7 {
            out.push((CandleFamily::Kicker, "bearish_kicker", Polarity::Bearish, 0.9));
        }
    }

    fn triples(c1: &Bar, c2: &Bar, c3: &Bar, out: &mut Vec<(CandleFamily, &'static str, Polarity, f64)>) {
        let mid1 = (c1.open + c1.close) / 2.0;

        // morning / evening star
        if c1.is_bearish() && c2.body() <= 0.3 * c1.body() && c3.is_bullish() && c3.close > mid1 {
            out.push((CandleFamily::Star, "morning_star", Polarity::Bullish, 1.0));
        }
        if c1.is_bullish() && c2.body() <= 0.3 * c1.body() && c3.is_bearish() && c3.close < mid1 {
            out.push((CandleFamily::Star, "evening_star", Polarity::Bearish, 1.0));
        }

        // three white soldiers / black crows
        if c1.is_bullish()
            && c2.is_bullish()
            && c3.is_bullish()
            && c2.open > c1.open
            && c2.open < c1.close
            && c3.open > c2.open
            && c3.open < c2.close
            && c2.close > c1.close
            && c3.close > c2.close
        {
            out.push((CandleFamily::SoldiersCrows, "three_white_soldiers", Polarity::Bullish, 1.0));
        }
        if c1.is_bearish()
            && c2.is_bearish()
            && c3.is_bearish()
            && c2.open < c1.open
            && c2.open > c1.close
            && c3.open < c2.open
            && c3.open > c2.close
            && c2.close < c1.close
            && c3.close < c2.close
        {
            out.push((CandleFamily::SoldiersCrows, "three_black_crows", Polarity::Bearish, 1.0));
        }

        // abandoned baby: doji island gapping away from both neighbors
        let is_doji = c2.body() <= DOJI_BODY_MAX * c2.range().max(f64::EPSILON);
        if c1.is_bearish() && is_doji && c2.high < c1.low && c3.is_bullish() && c3.low > c2.high {
            out.push((CandleFamily::AbandonedBaby, "bullish_abandoned_baby", Polarity::Bullish, 1.0));
        }
        if c1.is_bullish() && is_doji && c2.low > c1.high && c3.is_bearish() && c3.high < c2.low {
            out.push((CandleFamily::AbandonedBaby, "bearish_abandoned_baby", Polarity::Bearish, 1.0));
        }
    }
}
