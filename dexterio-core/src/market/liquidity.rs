//! Liquidity level tracking.
//!
//! Levels are recomputed at the start of each session from the prior daily
//! bar, the accumulated session ranges, and equal-high/low clusters in the
//! 15m window. Once a level is swept it stays swept; recomputation produces
//! a fresh set.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{Bar, Direction, Session};
use crate::market::structure::pivot_points;

/// What a liquidity level marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Pdh,
    Pdl,
    AsiaHigh,
    AsiaLow,
    LondonHigh,
    LondonLow,
    EqualHighs,
    EqualLows,
    Trendline,
}

impl LevelKind {
    /// High-side levels are swept by a pierce of the bar high; low-side by
    /// the bar low.
    pub fn is_high_side(self) -> bool {
        matches!(
            self,
            LevelKind::Pdh | LevelKind::AsiaHigh | LevelKind::LondonHigh | LevelKind::EqualHighs
        )
    }
}

/// A tracked resting-liquidity price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityLevel {
    pub price: f64,
    pub kind: LevelKind,
    pub created_ts: DateTime<Utc>,
    pub swept: bool,
    pub swept_ts: Option<DateTime<Utc>>,
}

impl LiquidityLevel {
    fn new(price: f64, kind: LevelKind, created_ts: DateTime<Utc>) -> Self {
        Self { price, kind, created_ts, swept: false, swept_ts: None }
    }
}

/// Tolerance for clustering pivot highs/lows into equal-highs/lows, as a
/// fraction of price.
const EQUAL_LEVEL_TOL: f64 = 0.0005;

/// Per-symbol liquidity state.
#[derive(Debug)]
pub struct LiquidityTracker {
    /// Pierce distance required to flag a sweep, in price units.
    sweep_threshold: f64,
    levels: Vec<LiquidityLevel>,
    session_ranges: HashMap<(NaiveDate, Session), (f64, f64)>,
    current: Option<(NaiveDate, Session)>,
}

impl LiquidityTracker {
    pub fn new(sweep_threshold: f64) -> Self {
        Self { sweep_threshold, levels: Vec::new(), session_ranges: HashMap::new(), current: None }
    }

    /// Feed one bar. Rebuilds the level set on a session transition, then
    /// updates sweep flags against the bar's range.
    pub fn on_bar(
        &mut self,
        bar: &Bar,
        session: Session,
        et_date: NaiveDate,
        daily_window: &[Bar],
        m15_window: &[Bar],
    ) {
        let key = (et_date, session);
        let entry = self.session_ranges.entry(key).or_insert((bar.high, bar.low));
        entry.0 = entry.0.max(bar.high);
        entry.1 = entry.1.min(bar.low);

        if self.current != Some(key) {
            self.current = Some(key);
            self.rebuild(bar.timestamp, et_date, daily_window, m15_window);
        }

        self.update_sweeps(bar);
    }

    fn rebuild(
        &mut self,
        ts: DateTime<Utc>,
        et_date: NaiveDate,
        daily_window: &[Bar],
        m15_window: &[Bar],
    ) {
        self.levels.clear();

        if let Some(prev_day) = daily_window.last() {
            self.levels.push(LiquidityLevel::new(prev_day.high, LevelKind::Pdh, ts));
            self.levels.push(LiquidityLevel::new(prev_day.low, LevelKind::Pdl, ts));
        }

        if let Some(&(high, low)) = self.session_ranges.get(&(et_date, Session::Asia)) {
            self.levels.push(LiquidityLevel::new(high, LevelKind::AsiaHigh, ts));
            self.levels.push(LiquidityLevel::new(low, LevelKind::AsiaLow, ts));
        }
        if let Some(&(high, low)) = self.session_ranges.get(&(et_date, Session::London)) {
            self.levels.push(LiquidityLevel::new(high, LevelKind::LondonHigh, ts));
            self.levels.push(LiquidityLevel::new(low, LevelKind::LondonLow, ts));
        }

        let (highs, lows) = pivot_points(m15_window, 3);
        if let [.., a, b] = highs.as_slice() {
            if (a.price - b.price).abs() <= a.price * EQUAL_LEVEL_TOL {
                self.levels.push(LiquidityLevel::new(a.price.max(b.price), LevelKind::EqualHighs, ts));
            }
        }
        if let [.., a, b] = lows.as_slice() {
            if (a.price - b.price).abs() <= a.price * EQUAL_LEVEL_TOL {
                self.levels.push(LiquidityLevel::new(a.price.min(b.price), LevelKind::EqualLows, ts));
            }
        }
    }

    fn update_sweeps(&mut self, bar: &Bar) {
        for level in &mut self.levels {
            if level.swept {
                continue;
            }
            let pierced = if level.kind.is_high_side() {
                bar.high >= level.price + self.sweep_threshold
            } else {
                bar.low <= level.price - self.sweep_threshold
            };
            if pierced {
                level.swept = true;
                level.swept_ts = Some(bar.timestamp);
            }
        }
    }

    pub fn levels(&self) -> &[LiquidityLevel] {
        &self.levels
    }

    /// Nearest unswept level on the opposite side of `price` for a trade in
    /// `direction`: the target side.
    pub fn nearest_opposite(&self, price: f64, direction: Direction) -> Option<&LiquidityLevel> {
        match direction {
            Direction::Long => self
                .levels
                .iter()
                .filter(|l| !l.swept && l.price > price)
                .min_by(|a, b| a.price.total_cmp(&b.price)),
            Direction::Short => self
                .levels
                .iter()
                .filter(|l| !l.swept && l.price < price)
                .max_by(|a, b| a.price.total_cmp(&b.price)),
        }
    }

    /// Unswept level closest to `price` within `tolerance`, if any. Used by
    /// the candlestick `at_level` flag.
    pub fn level_near(&self, price: f64, tolerance: f64) -> Option<&LiquidityLevel> {
        self.levels
            .iter()
            .filter(|l| !l.swept && (l.price - price).abs() <= tolerance)
            .min_by(|a, b| (a.price - price).abs().total_cmp(&(b.price - price).abs()))
    }
}
