//! Playbook gating and scoring.
//!
//! Every playbook in the catalog is evaluated on every bar and yields
//! exactly one `Evaluation`: a match, or a rejection with a single reason
//! from the closed taxonomy.

use std::collections::BTreeSet;

use crate::domain::setup::{PlaybookMatch, ScoreComponents, TriggerLevels};
use crate::domain::types::{Bias, Grade, Polarity, Structure, TradingMode};
use crate::market::state::MarketState;
use crate::market::et_minute_of_day;
use crate::patterns::{CandlestickDetection, IctDetection};

use super::{GateReject, Playbook, TimeWindow};

/// Result of evaluating one playbook against one bar.
#[derive(Debug, Clone)]
pub enum Evaluation {
    Match(PlaybookMatch),
    Reject { playbook: String, reason: GateReject },
}

impl Evaluation {
    pub fn as_match(&self) -> Option<&PlaybookMatch> {
        match self {
            Evaluation::Match(m) => Some(m),
            Evaluation::Reject { .. } => None,
        }
    }
}

/// Evaluates the configured catalog against market state and patterns.
#[derive(Debug)]
pub struct PlaybookEvaluator {
    catalog: Vec<Playbook>,
    mode: TradingMode,
    /// Global fallback when a playbook declares no windows of its own.
    default_windows: Vec<TimeWindow>,
    /// Gates the AGGRESSIVE mode may wave through. Default empty: the
    /// detectors are wired, so no relaxation is needed; anything listed here
    /// is recorded on the match for audit.
    bypass: BTreeSet<GateReject>,
}

impl PlaybookEvaluator {
    pub fn new(catalog: Vec<Playbook>, mode: TradingMode, default_windows: Vec<TimeWindow>) -> Self {
        Self { catalog, mode, default_windows, bypass: BTreeSet::new() }
    }

    pub fn with_bypass(mut self, gates: impl IntoIterator<Item = GateReject>) -> Self {
        self.bypass = gates.into_iter().collect();
        self
    }

    pub fn catalog(&self) -> &[Playbook] {
        &self.catalog
    }

    /// Evaluate every playbook. The output length always equals the catalog
    /// length.
    pub fn evaluate_all(
        &self,
        state: &MarketState,
        ict: &[IctDetection],
        candles: &[CandlestickDetection],
    ) -> Vec<Evaluation> {
        self.catalog.iter().map(|pb| self.evaluate(pb, state, ict, candles)).collect()
    }

    fn evaluate(
        &self,
        pb: &Playbook,
        state: &MarketState,
        ict: &[IctDetection],
        candles: &[CandlestickDetection],
    ) -> Evaluation {
        let mut bypasses: Vec<String> = Vec::new();
        let mut gate = |reason: GateReject, failed: bool| -> Option<GateReject> {
            if !failed {
                return None;
            }
            if self.mode == TradingMode::Aggressive && self.bypass.contains(&reason) {
                bypasses.push(reason.as_str().to_string());
                None
            } else {
                Some(reason)
            }
        };
        let reject = |playbook: &Playbook, reason: GateReject| Evaluation::Reject {
            playbook: playbook.name.clone(),
            reason,
        };

        // session
        let outside_session =
            !pb.session_allowed.is_empty() && !pb.session_allowed.contains(&state.session);
        if let Some(r) = gate(GateReject::SessionOutside, outside_session) {
            return reject(pb, r);
        }

        // ET time windows: the playbook's own, else the global default
        let windows: &[TimeWindow] =
            if pb.time_windows.is_empty() { &self.default_windows } else { &pb.time_windows };
        let minute = et_minute_of_day(state.timestamp);
        let outside_window = !windows.is_empty() && !windows.iter().any(|w| w.contains(minute));
        if let Some(r) = gate(GateReject::TimefilterOutsideWindow, outside_window) {
            return reject(pb, r);
        }

        // daily structure: unknown always passes
        let structure_mismatch = !pb.structure_htf.is_empty()
            && state.daily_structure != Structure::Unknown
            && !pb.structure_htf.contains(&state.daily_structure);
        if let Some(r) = gate(GateReject::StructureHtfMismatch, structure_mismatch) {
            return reject(pb, r);
        }

        // day type
        let day_type_mismatch =
            !pb.day_type_allowed.is_empty() && !pb.day_type_allowed.contains(&state.day_type);
        if pb.news_events_only {
            // fail-closed: news playbooks never trade an unclassified day
            if let Some(r) = gate(GateReject::NewsEventsDayTypeMismatch, day_type_mismatch) {
                return reject(pb, r);
            }
        } else if let Some(r) = gate(GateReject::DayTypeMismatch, day_type_mismatch) {
            return reject(pb, r);
        }

        // required ICT families present this bar
        let ict_missing = pb
            .required_ict_families
            .iter()
            .any(|family| !ict.iter().any(|d| d.kind == *family));
        if let Some(r) = gate(GateReject::IctMissing, ict_missing) {
            return reject(pb, r);
        }

        // required candlestick families present this bar
        let candles_missing = pb
            .required_candlestick_families
            .iter()
            .any(|family| !candles.iter().any(|d| d.family == *family));
        if let Some(r) = gate(GateReject::CandlestickPatternsMissing, candles_missing) {
            return reject(pb, r);
        }

        // volatility floor
        let too_quiet = pb.volatility_min.map(|floor| state.volatility < floor).unwrap_or(false);
        if let Some(r) = gate(GateReject::VolatilityInsufficient, too_quiet) {
            return reject(pb, r);
        }

        // direction and stop anchor prefer the strongest relevant ICT
        // detection; a playbook that requires no ICT families (or whose ICT
        // gate was bypassed) falls back to the strongest candlestick, then
        // to the HTF context
        let trigger_det = strongest_ict(pb, ict);
        let trigger = trigger_det
            .map(|d| TriggerLevels { invalidation: d.invalidation, anchor: d.anchor });
        let polarity = trigger_det
            .map(|d| d.direction)
            .or_else(|| strongest_candle(pb, candles).map(|d| d.direction))
            .or_else(|| context_polarity(state));
        let direction = match polarity {
            Some(p) => p.direction(),
            // no detection of any kind and a directionless context: there is
            // nothing to trade on
            None => return reject(pb, GateReject::IctMissing),
        };

        let components = ScoreComponents {
            ict_score: ict_score(pb, ict),
            pattern_score: pattern_score(pb, candles),
            context_score: context_score(state),
        };
        let score = pb.scoring_weights.ict * components.ict_score
            + pb.scoring_weights.pattern * components.pattern_score
            + pb.scoring_weights.context * components.context_score;

        if score < pb.min_score {
            return reject(pb, GateReject::ScoreBelowMin);
        }

        Evaluation::Match(PlaybookMatch {
            playbook_name: pb.name.clone(),
            category: pb.category,
            symbol: state.symbol.clone(),
            timestamp: state.timestamp,
            direction,
            score,
            grade: Grade::from_score(score),
            components,
            min_rr: pb.min_rr,
            trigger,
            bypasses,
        })
    }
}

/// Strongest detection among the playbook's required ICT families, or among
/// all detections when the playbook requires none.
fn strongest_ict<'a>(pb: &Playbook, ict: &'a [IctDetection]) -> Option<&'a IctDetection> {
    let pool = ict.iter().filter(|d| {
        pb.required_ict_families.is_empty() || pb.required_ict_families.contains(&d.kind)
    });
    pool.max_by(|a, b| a.strength.total_cmp(&b.strength))
}

/// Strongest candlestick among the playbook's required families, or among
/// all detections when the playbook requires none.
fn strongest_candle<'a>(
    pb: &Playbook,
    candles: &'a [CandlestickDetection],
) -> Option<&'a CandlestickDetection> {
    let pool = candles.iter().filter(|d| {
        pb.required_candlestick_families.is_empty()
            || pb.required_candlestick_families.contains(&d.family)
    });
    pool.max_by(|a, b| a.strength.total_cmp(&b.strength))
}

/// Directional read of the HTF context: the bias when it is clear, else the
/// daily trend.
fn context_polarity(state: &MarketState) -> Option<Polarity> {
    match state.bias {
        Bias::Bullish => Some(Polarity::Bullish),
        Bias::Bearish => Some(Polarity::Bearish),
        Bias::Neutral => match state.daily_structure {
            Structure::Uptrend => Some(Polarity::Bullish),
            Structure::Downtrend => Some(Polarity::Bearish),
            _ => None,
        },
    }
}

fn ict_score(pb: &Playbook, ict: &[IctDetection]) -> f64 {
    if pb.required_ict_families.is_empty() {
        return ict.iter().map(|d| d.strength).fold(0.0, f64::max);
    }
    let mut sum = 0.0;
    for family in &pb.required_ict_families {
        sum += ict
            .iter()
            .filter(|d| d.kind == *family)
            .map(|d| d.strength)
            .fold(0.0, f64::max);
    }
    sum / pb.required_ict_families.len() as f64
}

fn pattern_score(pb: &Playbook, candles: &[CandlestickDetection]) -> f64 {
    let relevant: Vec<f64> = candles
        .iter()
        .filter(|d| {
            pb.required_candlestick_families.is_empty()
                || pb.required_candlestick_families.contains(&d.family)
        })
        .map(|d| d.strength)
        .collect();
    if relevant.is_empty() {
        return 0.0;
    }
    relevant.iter().sum::<f64>() / relevant.len() as f64
}

/// Context clarity: half from the HTF bias, half from the daily structure.
fn context_score(state: &MarketState) -> f64 {
    let bias_term = if state.bias != Bias::Neutral { 0.9 } else { 0.5 };
    let structure_term = if state.daily_structure.is_trending() { 0.8 } else { 0.3 };
    0.5 * bias_term + 0.5 * structure_term
}
