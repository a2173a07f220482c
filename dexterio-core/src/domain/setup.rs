//! Playbook matches and the `Setup` record they condense into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Bias, DayType, Direction, Grade, Session, Structure, TradeType};
use crate::patterns::PatternDetection;

/// Score components that combine into the playbook score.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub ict_score: f64,
    pub pattern_score: f64,
    pub context_score: f64,
}

/// Price levels the triggering ICT pattern contributes to setup construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TriggerLevels {
    /// Price beyond which the pattern is invalidated; the stop anchors here.
    pub invalidation: f64,
    /// Optional entry anchor (e.g. FVG midpoint) instead of the bar close.
    pub anchor: Option<f64>,
}

/// A playbook that matched the current bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookMatch {
    pub playbook_name: String,
    pub category: TradeType,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub score: f64,
    pub grade: Grade,
    pub components: ScoreComponents,
    pub min_rr: f64,
    /// Levels from the strongest ICT detection, when one backs the match.
    /// Absent for matches carried by candlesticks or context alone; the
    /// setup engine then derives a volatility-based stop.
    pub trigger: Option<TriggerLevels>,
    /// Gates waved through by the AGGRESSIVE bypass table, recorded for audit.
    pub bypasses: Vec<String>,
}

/// Concrete trade candidate produced by the setup engine at one bar.
///
/// Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setup {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub direction: Direction,
    pub quality: Grade,
    pub final_score: f64,
    pub trade_type: TradeType,
    pub entry: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub risk_reward: f64,
    pub market_bias: Bias,
    pub session: Session,
    pub day_type: DayType,
    pub daily_structure: Structure,
    pub confluences_count: usize,
    pub playbook_name: String,
    pub playbook_matches: Vec<PlaybookMatch>,
    pub ict_patterns: Vec<PatternDetection>,
    pub notes: String,
}

impl Setup {
    /// Per-share risk distance. Always positive for a well-formed setup.
    pub fn stop_distance(&self) -> f64 {
        (self.entry - self.stop).abs()
    }
}
