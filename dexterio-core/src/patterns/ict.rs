//! ICT structure detection: BOS, CHoCH, FVG, liquidity sweep, order block.
//!
//! All strength scores land in [0,1] and are deterministic functions of the
//! candle window and tracked levels.

use std::collections::HashMap;

use crate::domain::{Bar, Polarity};
use crate::market::liquidity::LiquidityLevel;
use crate::market::structure::{atr, pivot_points};
use crate::timeframe::Timeframe;

use super::{IctDetection, IctKind};

/// Breakout must clear the pivot by this many ATRs to count as a BOS.
const BOS_BUFFER_ATR: f64 = 0.1;
/// Minimum FVG size: max of this fraction of price and 0.3 ATR.
const FVG_MIN_SIZE_PCT: f64 = 0.001;
const FVG_MIN_SIZE_ATR: f64 = 0.3;
/// How many trailing candles the FVG scan covers.
const FVG_SCAN: usize = 30;

/// Stateful ICT detector. Tracks the dominant swing per symbol so a BOS
/// against it can be flagged as a change of character.
#[derive(Debug)]
pub struct IctEngine {
    /// Pierce distance for sweep detection, in price units.
    sweep_threshold: f64,
    dominant_swing: HashMap<String, Polarity>,
}

impl IctEngine {
    pub fn new(sweep_threshold: f64) -> Self {
        Self { sweep_threshold, dominant_swing: HashMap::new() }
    }

    /// Run all detectors over the window's latest state. Call when the
    /// window gains a closed bar.
    pub fn detect(
        &mut self,
        symbol: &str,
        window: &[Bar],
        levels: &[LiquidityLevel],
        tf: Timeframe,
    ) -> Vec<IctDetection> {
        let mut out = Vec::new();
        if window.len() < 3 {
            return out;
        }

        let bos = self.detect_bos(window, tf);
        if let Some(bos) = &bos {
            // BOS against the prior dominant swing is a change of character.
            let prior = self.dominant_swing.get(symbol).copied();
            if let Some(prior) = prior {
                if prior != bos.direction {
                    out.push(IctDetection { kind: IctKind::Choch, ..bos.clone() });
                }
            }
            self.dominant_swing.insert(symbol.to_string(), bos.direction);

            if let Some(ob) = Self::detect_order_block(window, bos, tf) {
                out.push(ob);
            }
            out.push(bos.clone());
        }

        out.extend(Self::detect_fvg(window, tf));
        out.extend(self.detect_sweep(window, levels, tf));
        out
    }

    fn detect_bos(&self, window: &[Bar], tf: Timeframe) -> Option<IctDetection> {
        if window.len() < 10 {
            return None;
        }
        let (highs, lows) = pivot_points(window, 3);
        let last_high = highs.last()?;
        let last_low = lows.last()?;

        let current = window.last().expect("non-empty window");
        let prev = &window[window.len() - 2];
        let buffer = BOS_BUFFER_ATR * atr(window, 14);

        let vol_ratio = if prev.volume > 0.0 { current.volume / prev.volume } else { 1.0 };
        let vol_score = (vol_ratio / 1.5).min(1.0);
        let body_ratio = current.body_ratio();

        if current.close > last_high.price + buffer {
            let breakout = (current.close - last_high.price) / last_high.price;
            let strength =
                (0.5 * (breakout * 100.0).min(1.0) + 0.25 * vol_score + 0.25 * body_ratio).min(1.0);
            return Some(IctDetection {
                kind: IctKind::Bos,
                direction: Polarity::Bullish,
                strength,
                timeframe: tf,
                timestamp: current.timestamp,
                level_refs: vec![last_high.price],
                // a retest failing back below the broken pivot invalidates
                invalidation: last_high.price,
                anchor: None,
            });
        }
        if current.close < last_low.price - buffer {
            let breakout = (last_low.price - current.close) / last_low.price;
            let strength =
                (0.5 * (breakout * 100.0).min(1.0) + 0.25 * vol_score + 0.25 * body_ratio).min(1.0);
            return Some(IctDetection {
                kind: IctKind::Bos,
                direction: Polarity::Bearish,
                strength,
                timeframe: tf,
                timestamp: current.timestamp,
                level_refs: vec![last_low.price],
                invalidation: last_low.price,
                anchor: None,
            });
        }
        None
    }

    fn detect_fvg(window: &[Bar], tf: Timeframe) -> Vec<IctDetection> {
        let mut out = Vec::new();
        let n = window.len();
        if n < 3 {
            return out;
        }
        let window_atr = atr(window, 14);
        let current_price = window[n - 1].close;
        let start = n.saturating_sub(FVG_SCAN);

        for i in (start + 2)..n {
            let (c1, c2, c3) = (&window[i - 2], &window[i - 1], &window[i]);

            let (gap, top, bottom, direction) = if c1.high < c3.low {
                (c3.low - c1.high, c3.low, c1.high, Polarity::Bullish)
            } else if c1.low > c3.high {
                (c1.low - c3.high, c1.low, c3.high, Polarity::Bearish)
            } else {
                continue;
            };

            let min_gap = (c2.close * FVG_MIN_SIZE_PCT).max(FVG_MIN_SIZE_ATR * window_atr);
            if gap < min_gap {
                continue;
            }

            let mid = (top + bottom) / 2.0;

            // fully traded-through gaps are dead
            match direction {
                Polarity::Bullish if current_price < bottom => continue,
                Polarity::Bearish if current_price > top => continue,
                _ => {}
            }

            let gap_pct = gap / c2.close * 100.0;
            let impulse = c3.body_ratio();
            let proximity = (1.0 - (current_price - mid).abs() / (current_price * 0.01)).max(0.0);
            let strength =
                (0.4 * (gap_pct * 2.0).min(1.0) + 0.3 * impulse + 0.3 * proximity).min(1.0);

            out.push(IctDetection {
                kind: IctKind::Fvg,
                direction,
                strength,
                timeframe: tf,
                timestamp: c3.timestamp,
                level_refs: vec![bottom, top],
                // price escaping out the far side kills the gap
                invalidation: if direction == Polarity::Bullish { bottom } else { top },
                anchor: Some(mid),
            });
        }
        out
    }

    fn detect_sweep(
        &self,
        window: &[Bar],
        levels: &[LiquidityLevel],
        tf: Timeframe,
    ) -> Vec<IctDetection> {
        let mut out = Vec::new();
        let current = match window.last() {
            Some(b) => b,
            None => return out,
        };
        let window_atr = atr(window, 14);

        for level in levels {
            let price = level.price;

            // wick beyond the level with a close back inside
            if level.kind.is_high_side()
                && current.high > price + self.sweep_threshold
                && current.close < price
            {
                let wick_pct = current.upper_wick() / current.high * 100.0;
                let rejection = if window_atr > 0.0 {
                    ((price - current.close) / window_atr).min(1.0)
                } else {
                    0.5
                };
                let body = if current.is_bearish() { 1.0 } else { 0.5 };
                let strength = (0.4 * wick_pct.min(1.0) + 0.4 * rejection + 0.2 * body).min(1.0);
                out.push(IctDetection {
                    kind: IctKind::Sweep,
                    direction: Polarity::Bearish,
                    strength,
                    timeframe: tf,
                    timestamp: current.timestamp,
                    level_refs: vec![price],
                    invalidation: current.high,
                    anchor: None,
                });
            } else if !level.kind.is_high_side()
                && current.low < price - self.sweep_threshold
                && current.close > price
            {
                let wick_pct = current.lower_wick() / current.low.max(f64::EPSILON) * 100.0;
                let rejection = if window_atr > 0.0 {
                    ((current.close - price) / window_atr).min(1.0)
                } else {
                    0.5
                };
                let body = if current.is_bullish() { 1.0 } else { 0.5 };
                let strength = (0.4 * wick_pct.min(1.0) + 0.4 * rejection + 0.2 * body).min(1.0);
                out.push(IctDetection {
                    kind: IctKind::Sweep,
                    direction: Polarity::Bullish,
                    strength,
                    timeframe: tf,
                    timestamp: current.timestamp,
                    level_refs: vec![price],
                    invalidation: current.low,
                    anchor: None,
                });
            }
        }
        out
    }

    fn detect_order_block(window: &[Bar], bos: &IctDetection, tf: Timeframe) -> Option<IctDetection> {
        let n = window.len();
        // last opposite-direction candle within the 10 bars before the displacement
        let scan = window[n.saturating_sub(11)..n - 1].iter().rev();
        let ob = match bos.direction {
            Polarity::Bullish => scan.clone().find(|c| c.is_bearish()),
            Polarity::Bearish => scan.clone().find(|c| c.is_bullish()),
        }?;

        let (bottom, top) = match bos.direction {
            Polarity::Bullish => (ob.low, ob.open.min(ob.close)),
            Polarity::Bearish => (ob.open.max(ob.close), ob.high),
        };
        let zone = top - bottom;
        if zone <= 0.0 {
            return None;
        }
        let zone_score = ((zone / ob.close * 100.0) / 0.5).min(1.0);
        let strength = (0.5 * bos.strength + 0.25 * zone_score + 0.25 * ob.body_ratio()).min(1.0);

        Some(IctDetection {
            kind: IctKind::OrderBlock,
            direction: bos.direction,
            strength,
            timeframe: tf,
            timestamp: ob.timestamp,
            level_refs: vec![bottom, top],
            invalidation: if bos.direction == Polarity::Bullish { bottom } else { top },
            anchor: Some((top + bottom) / 2.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::liquidity::LevelKind;
    use chrono::{Duration, TimeZone, Utc};

    fn mk_bars(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 8, 1, 13, 30, 0).unwrap();
        ohlc.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| {
                Bar::new(start + Duration::minutes(5 * i as i64), "SPY", o, h, l, c, 100.0)
            })
            .collect()
    }

    /// Chop around 100 with a pivot low at 99.0, a pivot high at 102, then a
    /// breakout close.
    fn breakout_window() -> Vec<Bar> {
        let mut ohlc = vec![(100.0, 100.6, 99.4, 100.0); 8];
        ohlc[3] = (100.0, 100.6, 99.0, 100.0); // pivot low candidate
        ohlc.push((100.0, 102.0, 99.8, 101.0)); // pivot high candidate
        ohlc.extend(vec![(100.0, 100.6, 99.4, 100.0); 8]);
        ohlc.push((100.5, 103.6, 100.4, 103.5)); // breakout close above 102
        mk_bars(&ohlc)
    }

    #[test]
    fn bos_fires_on_close_beyond_pivot() {
        let mut engine = IctEngine::new(0.02);
        let window = breakout_window();
        let detections = engine.detect("SPY", &window, &[], Timeframe::M5);
        let bos: Vec<_> = detections.iter().filter(|d| d.kind == IctKind::Bos).collect();
        assert_eq!(bos.len(), 1);
        assert_eq!(bos[0].direction, Polarity::Bullish);
        assert!(bos[0].strength > 0.0 && bos[0].strength <= 1.0);
        assert_eq!(bos[0].invalidation, 102.0);
    }

    #[test]
    fn bos_against_dominant_swing_is_choch() {
        let mut engine = IctEngine::new(0.02);
        // establish bullish dominance
        engine.detect("SPY", &breakout_window(), &[], Timeframe::M5);

        // mirror image: pivot high at 101, pivot low at 98, breakdown close
        let mut ohlc = vec![(100.0, 100.6, 99.4, 100.0); 8];
        ohlc[3] = (100.0, 101.0, 99.4, 100.0); // pivot high candidate
        ohlc.push((100.0, 100.2, 98.0, 99.0)); // pivot low candidate
        ohlc.extend(vec![(100.0, 100.6, 99.4, 100.0); 8]);
        ohlc.push((99.5, 99.6, 96.4, 96.5));
        let window = mk_bars(&ohlc);

        let detections = engine.detect("SPY", &window, &[], Timeframe::M5);
        assert!(detections.iter().any(|d| d.kind == IctKind::Choch && d.direction == Polarity::Bearish));
        assert!(detections.iter().any(|d| d.kind == IctKind::Bos && d.direction == Polarity::Bearish));
    }

    #[test]
    fn first_bos_is_not_choch() {
        let mut engine = IctEngine::new(0.02);
        let detections = engine.detect("SPY", &breakout_window(), &[], Timeframe::M5);
        assert!(!detections.iter().any(|d| d.kind == IctKind::Choch));
    }

    #[test]
    fn bullish_fvg_between_first_high_and_third_low() {
        // c1 high 100.5, c3 low 101.5: one-point gap on ~100 close
        let ohlc = [
            (100.0, 100.5, 99.5, 100.0),
            (100.4, 101.6, 100.3, 101.5),
            (101.6, 102.5, 101.5, 102.4),
        ];
        let window = mk_bars(&ohlc);
        let fvgs = IctEngine::detect_fvg(&window, Timeframe::M5);
        assert_eq!(fvgs.len(), 1);
        assert_eq!(fvgs[0].direction, Polarity::Bullish);
        assert_eq!(fvgs[0].level_refs, vec![100.5, 101.5]);
        assert_eq!(fvgs[0].anchor, Some(101.0));
    }

    #[test]
    fn filled_fvg_is_invalidated() {
        // same gap, then price trades back below the gap bottom
        let ohlc = [
            (100.0, 100.5, 99.5, 100.0),
            (100.4, 101.6, 100.3, 101.5),
            (101.6, 102.5, 101.5, 102.4),
            (102.0, 102.1, 99.0, 99.2),
        ];
        let window = mk_bars(&ohlc);
        let fvgs = IctEngine::detect_fvg(&window, Timeframe::M5);
        assert!(fvgs.iter().all(|f| f.direction != Polarity::Bullish) || fvgs.is_empty());
    }

    #[test]
    fn tiny_gap_below_minimum_is_ignored() {
        let ohlc = [
            (100.0, 100.5, 99.5, 100.0),
            (100.4, 100.56, 100.3, 100.5),
            (100.52, 100.7, 100.52, 100.6),
        ];
        let window = mk_bars(&ohlc);
        let fvgs = IctEngine::detect_fvg(&window, Timeframe::M5);
        assert!(fvgs.is_empty());
    }

    #[test]
    fn sweep_requires_pierce_and_close_back_inside() {
        let engine = IctEngine::new(0.02);
        let level = LiquidityLevel {
            price: 101.0,
            kind: LevelKind::Pdh,
            created_ts: Utc.with_ymd_and_hms(2025, 8, 1, 13, 0, 0).unwrap(),
            swept: false,
            swept_ts: None,
        };

        // wick through 101, close back under: bearish sweep
        let window = mk_bars(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.2, 101.4, 100.0, 100.4),
        ]);
        let sweeps = engine.detect_sweep(&window, &[level.clone()], Timeframe::M5);
        assert_eq!(sweeps.len(), 1);
        assert_eq!(sweeps[0].direction, Polarity::Bearish);
        assert_eq!(sweeps[0].level_refs, vec![101.0]);
        assert_eq!(sweeps[0].invalidation, 101.4);

        // close above the level: breakout, not a sweep
        let window = mk_bars(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.2, 101.6, 100.0, 101.5),
        ]);
        let sweeps = engine.detect_sweep(&window, &[level], Timeframe::M5);
        assert!(sweeps.is_empty());
    }

    #[test]
    fn order_block_is_last_opposite_candle_before_displacement() {
        let mut engine = IctEngine::new(0.02);
        let window = breakout_window();
        let detections = engine.detect("SPY", &window, &[], Timeframe::M5);
        let obs: Vec<_> = detections.iter().filter(|d| d.kind == IctKind::OrderBlock).collect();
        // breakout window candles before the displacement are dojis
        // (open == close), so no bearish OB candle exists
        assert!(obs.is_empty());

        // make the candle before the breakout bearish
        let mut window = breakout_window();
        let n = window.len();
        window[n - 2] = Bar::new(window[n - 2].timestamp, "SPY", 100.6, 100.7, 99.4, 99.5, 100.0);
        let detections = engine.detect("SPY", &window, &[], Timeframe::M5);
        let ob = detections.iter().find(|d| d.kind == IctKind::OrderBlock).unwrap();
        assert_eq!(ob.direction, Polarity::Bullish);
        assert_eq!(ob.level_refs, vec![99.4, 99.5]);
        assert_eq!(ob.invalidation, 99.4);
    }
}
