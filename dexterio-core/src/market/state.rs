//! Per-bar market state snapshots with HTF fingerprint caching.
//!
//! The HTF-derived part (structures, bias, volatility) only changes when a
//! higher-timeframe window gains a bar, so it is cached under a fingerprint
//! of the last closed-bar timestamp of every HTF window. Session and day
//! type depend on the current minute and today's pattern log and are
//! assembled fresh on every bar.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{Bar, Bias, DayType, Polarity, Session, Structure};
use crate::market::liquidity::LiquidityLevel;
use crate::market::structure::{atr, detect_structure};
use crate::timeframe::TimeframeAggregator;

/// Identity of the HTF window state: last closed-bar ts of each HTF, as
/// epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([Option<i64>; 5]);

impl Fingerprint {
    pub fn of(agg: &TimeframeAggregator, symbol: &str) -> Self {
        let ts = agg.htf_last_timestamps(symbol);
        Self(ts.map(|t| t.map(|t| t.timestamp_millis())))
    }

    /// Stable hex digest, for instrumentation output.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for slot in self.0 {
            hasher.update(&slot.unwrap_or(i64::MIN).to_le_bytes());
        }
        hasher.finalize().to_hex()[..16].to_string()
    }
}

/// The cached, HTF-derived slice of market state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HtfSnapshot {
    pub daily_structure: Structure,
    pub h4_structure: Structure,
    pub h1_structure: Structure,
    pub bias: Bias,
    /// ATR(14) of the 5m window — the volatility proxy for gating.
    pub volatility: f64,
}

/// Today's sweep/BOS events for one symbol, reset at each ET day boundary.
#[derive(Debug, Clone, Default)]
pub struct DayPatternLog {
    pub date: Option<NaiveDate>,
    pub sweeps: Vec<(DateTime<Utc>, Polarity)>,
    pub bos: Vec<(DateTime<Utc>, Polarity)>,
}

impl DayPatternLog {
    pub fn roll_to(&mut self, date: NaiveDate) {
        if self.date != Some(date) {
            self.date = Some(date);
            self.sweeps.clear();
            self.bos.clear();
        }
    }

    pub fn record_sweep(&mut self, ts: DateTime<Utc>, polarity: Polarity) {
        self.sweeps.push((ts, polarity));
    }

    pub fn record_bos(&mut self, ts: DateTime<Utc>, polarity: Polarity) {
        self.bos.push((ts, polarity));
    }
}

/// Full per-bar snapshot handed to the playbook evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub daily_structure: Structure,
    pub h4_structure: Structure,
    pub h1_structure: Structure,
    pub bias: Bias,
    pub session: Session,
    pub day_type: DayType,
    pub volatility: f64,
    pub liquidity_levels: Vec<LiquidityLevel>,
}

/// Derives market state from the aggregator windows, caching the HTF slice.
#[derive(Debug, Default)]
pub struct MarketStateEngine {
    cache: HashMap<String, (Fingerprint, HtfSnapshot)>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl MarketStateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTF snapshot for a symbol, recomputed only when an HTF window moved.
    pub fn htf_snapshot(&mut self, agg: &TimeframeAggregator, symbol: &str) -> HtfSnapshot {
        let fp = Fingerprint::of(agg, symbol);
        if let Some((cached_fp, snap)) = self.cache.get(symbol) {
            if *cached_fp == fp {
                self.cache_hits += 1;
                return *snap;
            }
        }
        self.cache_misses += 1;

        let snap = Self::compute_htf(agg, symbol);
        self.cache.insert(symbol.to_string(), (fp, snap));
        snap
    }

    fn compute_htf(agg: &TimeframeAggregator, symbol: &str) -> HtfSnapshot {
        use crate::timeframe::Timeframe;

        let daily_structure = detect_structure(agg.window(symbol, Timeframe::D1));
        let h4_structure = detect_structure(agg.window(symbol, Timeframe::H4));
        let h1_structure = detect_structure(agg.window(symbol, Timeframe::H1));

        let bias = match (daily_structure, h4_structure) {
            (Structure::Uptrend, Structure::Uptrend) => Bias::Bullish,
            (Structure::Downtrend, Structure::Downtrend) => Bias::Bearish,
            _ => Bias::Neutral,
        };

        let volatility = atr(agg.window(symbol, Timeframe::M5), 14);

        HtfSnapshot { daily_structure, h4_structure, h1_structure, bias, volatility }
    }

    /// Day classification from the daily structure and today's pattern log.
    pub fn day_type(daily_structure: Structure, log: &DayPatternLog) -> DayType {
        if daily_structure == Structure::Range {
            return DayType::Range;
        }

        // A sweep whose implied reversal is later confirmed by a BOS of the
        // same polarity marks a manipulation day. The sweep's polarity is
        // already the reversal direction, i.e. opposite the manipulation leg.
        let reversal_confirmed = log.sweeps.iter().any(|(sweep_ts, sweep_pol)| {
            log.bos.iter().any(|(bos_ts, bos_pol)| bos_ts > sweep_ts && bos_pol == sweep_pol)
        });
        if reversal_confirmed {
            return DayType::ManipulationReversal;
        }

        if daily_structure.is_trending() {
            let trend_pol = if daily_structure == Structure::Uptrend {
                Polarity::Bullish
            } else {
                Polarity::Bearish
            };
            let aligned = log.bos.iter().filter(|(_, p)| *p == trend_pol).count();
            if aligned >= 2 {
                return DayType::Trend;
            }
        }

        DayType::Unknown
    }

    /// Assemble the full snapshot for the current bar.
    #[allow(clippy::too_many_arguments)]
    pub fn market_state(
        &mut self,
        agg: &TimeframeAggregator,
        bar: &Bar,
        session: Session,
        log: &DayPatternLog,
        levels: &[LiquidityLevel],
    ) -> MarketState {
        let htf = self.htf_snapshot(agg, &bar.symbol);
        MarketState {
            symbol: bar.symbol.clone(),
            timestamp: bar.timestamp,
            daily_structure: htf.daily_structure,
            h4_structure: htf.h4_structure,
            h1_structure: htf.h1_structure,
            bias: htf.bias,
            session,
            day_type: Self::day_type(htf.daily_structure, log),
            volatility: htf.volatility,
            liquidity_levels: levels.to_vec(),
        }
    }
}
