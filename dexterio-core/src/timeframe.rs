//! Incremental multi-timeframe aggregation.
//!
//! Folds 1-minute bars into 5m/15m/1h/4h/1d rolling windows. Higher-timeframe
//! bars are only appended when their bucket closes; downstream components
//! never see a partial bar. Closed bars carry the bucket-start timestamp.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::Bar;
use crate::error::StateError;

/// The timeframes maintained per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] =
        [Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1];

    /// Higher timeframes built from 1m bars.
    pub const HTF: [Timeframe; 5] =
        [Timeframe::M5, Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1];

    /// Rolling window cap per timeframe.
    pub fn window_cap(self) -> usize {
        match self {
            Timeframe::M1 => 500,
            Timeframe::M5 => 200,
            Timeframe::M15 => 100,
            Timeframe::H1 => 50,
            Timeframe::H4 => 30,
            Timeframe::D1 => 30,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

/// Bounded, append-only window of closed bars for one timeframe.
#[derive(Debug, Clone, Default)]
pub struct Window {
    bars: Vec<Bar>,
    cap: usize,
}

impl Window {
    fn with_cap(cap: usize) -> Self {
        Self { bars: Vec::new(), cap }
    }

    fn push(&mut self, bar: Bar) {
        self.bars.push(bar);
        if self.bars.len() > self.cap {
            self.bars.remove(0);
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_ts(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }
}

#[derive(Debug, Default)]
struct SymbolBook {
    windows: HashMap<Timeframe, Window>,
    building: HashMap<Timeframe, Bar>,
    last_1m_ts: Option<DateTime<Utc>>,
}

impl SymbolBook {
    fn new() -> Self {
        let mut windows = HashMap::new();
        for tf in Timeframe::ALL {
            windows.insert(tf, Window::with_cap(tf.window_cap()));
        }
        Self { windows, building: HashMap::new(), last_1m_ts: None }
    }
}

/// Maintains per-symbol rolling windows at 1m/5m/15m/1h/4h/1d.
#[derive(Debug)]
pub struct TimeframeAggregator {
    /// UTC hour whose final minute closes the daily bucket (19 = 16:00 ET
    /// during daylight saving).
    market_close_hour_utc: u32,
    /// UTC hours whose final minute closes one of the three 4h buckets that
    /// overlap the trading day.
    h4_close_hours_utc: [u32; 3],
    books: HashMap<String, SymbolBook>,
}

impl TimeframeAggregator {
    pub fn new(market_close_hour_utc: u32) -> Self {
        Self {
            market_close_hour_utc,
            h4_close_hours_utc: [11, 15, 19],
            books: HashMap::new(),
        }
    }

    /// Feed one 1m bar; returns the timeframes closed by it (always
    /// includes `M1`). Bars must arrive in strictly ascending timestamp
    /// order per symbol.
    pub fn ingest(&mut self, bar: &Bar) -> Result<Vec<Timeframe>, StateError> {
        let book = self.books.entry(bar.symbol.clone()).or_insert_with(SymbolBook::new);

        if let Some(last) = book.last_1m_ts {
            if bar.timestamp == last {
                return Err(StateError::DuplicateBar {
                    component: "timeframe_aggregator",
                    symbol: bar.symbol.clone(),
                    ts: bar.timestamp,
                });
            }
            if bar.timestamp < last {
                return Err(StateError::OutOfOrderBar {
                    component: "timeframe_aggregator",
                    symbol: bar.symbol.clone(),
                    ts: bar.timestamp,
                    last_ts: last,
                });
            }
        }
        book.last_1m_ts = Some(bar.timestamp);

        let mut closed = vec![Timeframe::M1];
        book.windows.get_mut(&Timeframe::M1).expect("1m window").push(bar.clone());

        let minute = bar.timestamp.minute();
        let hour = bar.timestamp.hour();

        for tf in Timeframe::HTF {
            let is_close = match tf {
                Timeframe::M5 => minute % 5 == 4,
                Timeframe::M15 => minute % 15 == 14,
                Timeframe::H1 => minute == 59,
                Timeframe::H4 => minute == 59 && self.h4_close_hours_utc.contains(&hour),
                Timeframe::D1 => minute == 59 && hour == self.market_close_hour_utc,
                Timeframe::M1 => unreachable!(),
            };

            match book.building.get_mut(&tf) {
                None => {
                    let mut open = bar.clone();
                    open.timestamp = bucket_start(bar.timestamp, tf);
                    book.building.insert(tf, open);
                }
                Some(building) => {
                    building.high = building.high.max(bar.high);
                    building.low = building.low.min(bar.low);
                    building.close = bar.close;
                    building.volume += bar.volume;
                }
            }

            if is_close {
                let done = book.building.remove(&tf).expect("bucket under construction");
                book.windows.get_mut(&tf).expect("htf window").push(done);
                closed.push(tf);
            }
        }

        Ok(closed)
    }

    /// Closed-bar window for a symbol/timeframe; empty slice when the symbol
    /// has produced nothing yet.
    pub fn window(&self, symbol: &str, tf: Timeframe) -> &[Bar] {
        self.books
            .get(symbol)
            .and_then(|b| b.windows.get(&tf))
            .map(|w| w.bars())
            .unwrap_or(&[])
    }

    /// Last closed-bar timestamp per HTF, in `Timeframe::HTF` order. Used as
    /// the market-state cache fingerprint input.
    pub fn htf_last_timestamps(&self, symbol: &str) -> [Option<DateTime<Utc>>; 5] {
        let mut out = [None; 5];
        if let Some(book) = self.books.get(symbol) {
            for (i, tf) in Timeframe::HTF.iter().enumerate() {
                out[i] = book.windows.get(tf).and_then(|w| w.last_ts());
            }
        }
        out
    }

    /// Drop all windows and in-progress buckets.
    pub fn reset(&mut self) {
        self.books.clear();
    }
}

/// Floor a timestamp to the start of its bucket for the given timeframe.
fn bucket_start(ts: DateTime<Utc>, tf: Timeframe) -> DateTime<Utc> {
    match tf {
        Timeframe::M1 => ts.duration_trunc(Duration::minutes(1)).expect("trunc 1m"),
        Timeframe::M5 => ts.duration_trunc(Duration::minutes(5)).expect("trunc 5m"),
        Timeframe::M15 => ts.duration_trunc(Duration::minutes(15)).expect("trunc 15m"),
        Timeframe::H1 => ts.duration_trunc(Duration::hours(1)).expect("trunc 1h"),
        Timeframe::H4 => ts.duration_trunc(Duration::hours(4)).expect("trunc 4h"),
        Timeframe::D1 => ts.duration_trunc(Duration::days(1)).expect("trunc 1d"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar_at(h: u32, m: u32, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2025, 8, 1, h, m, 0).unwrap();
        Bar::new(ts, "SPY", close, close + 1.0, close - 1.0, close, 100.0)
    }

    #[test]
    fn one_minute_window_always_closes() {
        let mut agg = TimeframeAggregator::new(19);
        let closed = agg.ingest(&bar_at(13, 31, 100.0)).unwrap();
        assert_eq!(closed, vec![Timeframe::M1]);
        assert_eq!(agg.window("SPY", Timeframe::M1).len(), 1);
    }

    #[test]
    fn five_minute_bucket_closes_on_minute_mod_five_eq_four() {
        let mut agg = TimeframeAggregator::new(19);
        for m in 30..=33 {
            let closed = agg.ingest(&bar_at(13, m, 100.0 + m as f64)).unwrap();
            assert!(!closed.contains(&Timeframe::M5));
        }
        let closed = agg.ingest(&bar_at(13, 34, 200.0)).unwrap();
        assert!(closed.contains(&Timeframe::M5));

        let w = agg.window("SPY", Timeframe::M5);
        assert_eq!(w.len(), 1);
        // open from the first bar of the bucket, close from the last
        assert_eq!(w[0].open, 130.0);
        assert_eq!(w[0].close, 200.0);
        assert_eq!(w[0].high, 201.0);
        assert_eq!(w[0].low, 129.0);
        assert_eq!(w[0].volume, 500.0);
        // closed bar carries the bucket-start timestamp
        assert_eq!(w[0].timestamp, Utc.with_ymd_and_hms(2025, 8, 1, 13, 30, 0).unwrap());
    }

    #[test]
    fn hourly_and_daily_close_on_configured_minute() {
        let mut agg = TimeframeAggregator::new(19);
        for m in 0..=58 {
            agg.ingest(&bar_at(19, m, 100.0)).unwrap();
        }
        let closed = agg.ingest(&bar_at(19, 59, 100.0)).unwrap();
        assert!(closed.contains(&Timeframe::H1));
        assert!(closed.contains(&Timeframe::H4));
        assert!(closed.contains(&Timeframe::D1));
    }

    #[test]
    fn four_hour_only_closes_on_aligned_hours() {
        let mut agg = TimeframeAggregator::new(19);
        let closed = agg.ingest(&bar_at(14, 59, 100.0)).unwrap();
        assert!(closed.contains(&Timeframe::H1));
        assert!(!closed.contains(&Timeframe::H4));
        let closed = agg.ingest(&bar_at(15, 59, 100.0)).unwrap();
        assert!(closed.contains(&Timeframe::H4));
    }

    #[test]
    fn window_cap_evicts_oldest() {
        let mut agg = TimeframeAggregator::new(19);
        let mut ts = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        for i in 0..600 {
            let bar = Bar::new(ts, "SPY", 100.0 + i as f64, 101.0 + i as f64, 99.0, 100.0 + i as f64, 1.0);
            agg.ingest(&bar).unwrap();
            ts += Duration::minutes(1);
        }
        let w = agg.window("SPY", Timeframe::M1);
        assert_eq!(w.len(), Timeframe::M1.window_cap());
        // oldest bars evicted, ordering preserved
        assert!(w.windows(2).all(|p| p[0].timestamp < p[1].timestamp));
    }

    #[test]
    fn duplicate_bar_is_state_error() {
        let mut agg = TimeframeAggregator::new(19);
        agg.ingest(&bar_at(13, 30, 100.0)).unwrap();
        assert!(matches!(
            agg.ingest(&bar_at(13, 30, 100.0)),
            Err(StateError::DuplicateBar { .. })
        ));
    }

    #[test]
    fn out_of_order_bar_is_state_error() {
        let mut agg = TimeframeAggregator::new(19);
        agg.ingest(&bar_at(13, 31, 100.0)).unwrap();
        assert!(matches!(
            agg.ingest(&bar_at(13, 30, 100.0)),
            Err(StateError::OutOfOrderBar { .. })
        ));
    }

    #[test]
    fn refeeding_after_reset_is_idempotent() {
        let bars: Vec<Bar> = (0..120).map(|i| bar_at(13 + i / 60, i % 60, 100.0 + i as f64)).collect();

        let mut agg = TimeframeAggregator::new(19);
        for b in &bars {
            agg.ingest(b).unwrap();
        }
        let first: Vec<Bar> = agg.window("SPY", Timeframe::M5).to_vec();

        agg.reset();
        for b in &bars {
            agg.ingest(b).unwrap();
        }
        assert_eq!(agg.window("SPY", Timeframe::M5), first.as_slice());
    }

    #[test]
    fn symbols_are_isolated() {
        let mut agg = TimeframeAggregator::new(19);
        agg.ingest(&bar_at(13, 30, 100.0)).unwrap();
        let mut qqq = bar_at(13, 30, 400.0);
        qqq.symbol = "QQQ".into();
        agg.ingest(&qqq).unwrap();
        assert_eq!(agg.window("SPY", Timeframe::M1).len(), 1);
        assert_eq!(agg.window("QQQ", Timeframe::M1).len(), 1);
        assert_eq!(agg.window("QQQ", Timeframe::M1)[0].close, 400.0);
    }
}
