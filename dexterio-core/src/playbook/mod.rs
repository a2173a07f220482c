//! Declarative playbook catalog and its evaluator.
//!
//! The trading doctrine lives in configuration; this module only fixes how
//! it is consumed. Gate failures are values from a closed taxonomy, never
//! errors.

pub mod evaluator;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::types::{DayType, Session, Structure, TradeType, TradingMode};
use crate::patterns::{CandleFamily, IctKind};

/// ET wall-clock window, minutes of day, inclusive on both ends. On the
/// wire it is a two-element `["HH:MM", "HH:MM"]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_min: u32,
    pub end_min: u32,
}

impl TimeWindow {
    pub fn contains(&self, minute_of_day: u32) -> bool {
        self.start_min <= minute_of_day && minute_of_day <= self.end_min
    }
}

impl serde::Serialize for TimeWindow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fmt = |m: u32| format!("{:02}:{:02}", m / 60, m % 60);
        [fmt(self.start_min), fmt(self.end_min)].serialize(serializer)
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

impl<'de> Deserialize<'de> for TimeWindow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pair: [String; 2] = Deserialize::deserialize(deserializer)?;
        let start_min = parse_hhmm(&pair[0])
            .ok_or_else(|| D::Error::custom(format!("bad time '{}', expected HH:MM", pair[0])))?;
        let end_min = parse_hhmm(&pair[1])
            .ok_or_else(|| D::Error::custom(format!("bad time '{}', expected HH:MM", pair[1])))?;
        if end_min < start_min {
            return Err(D::Error::custom(format!("window {}..{} ends before it starts", pair[0], pair[1])));
        }
        Ok(TimeWindow { start_min, end_min })
    }
}

/// Scoring weights per playbook; must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub ict: f64,
    pub pattern: f64,
    pub context: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.ict + self.pattern + self.context
    }
}

/// One declarative playbook record. Empty allow-sets mean "any".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub name: String,
    pub category: TradeType,
    #[serde(default)]
    pub structure_htf: Vec<Structure>,
    #[serde(default)]
    pub session_allowed: Vec<Session>,
    #[serde(default)]
    pub day_type_allowed: Vec<DayType>,
    #[serde(default)]
    pub required_ict_families: Vec<IctKind>,
    #[serde(default)]
    pub required_candlestick_families: Vec<CandleFamily>,
    /// Playbook-specific windows; falls back to the global default when empty.
    #[serde(default)]
    pub time_windows: Vec<TimeWindow>,
    pub min_rr: f64,
    #[serde(default)]
    pub min_score: f64,
    /// Fail-closed day-type gate for news-driven playbooks.
    #[serde(default)]
    pub news_events_only: bool,
    /// Minimum ATR(14) of the 5m window.
    #[serde(default)]
    pub volatility_min: Option<f64>,
    pub scoring_weights: ScoringWeights,
}

impl Playbook {
    /// Structural sanity; violations surface as config errors at load time.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("playbook with empty name".into());
        }
        if (self.scoring_weights.sum() - 1.0).abs() > 1e-9 {
            return Err(format!(
                "playbook '{}': scoring weights sum to {}, expected 1.0",
                self.name,
                self.scoring_weights.sum()
            ));
        }
        if self.min_rr <= 0.0 {
            return Err(format!("playbook '{}': min_rr must be positive", self.name));
        }
        Ok(())
    }
}

/// Gates a playbook evaluation can fail on. Closed set; every rejection is
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReject {
    SessionOutside,
    TimefilterOutsideWindow,
    StructureHtfMismatch,
    DayTypeMismatch,
    NewsEventsDayTypeMismatch,
    IctMissing,
    CandlestickPatternsMissing,
    VolatilityInsufficient,
    ScoreBelowMin,
}

impl GateReject {
    pub fn as_str(self) -> &'static str {
        match self {
            GateReject::SessionOutside => "session_outside",
            GateReject::TimefilterOutsideWindow => "timefilter_outside_window",
            GateReject::StructureHtfMismatch => "structure_htf_mismatch",
            GateReject::DayTypeMismatch => "day_type_mismatch",
            GateReject::NewsEventsDayTypeMismatch => "news_events_day_type_mismatch",
            GateReject::IctMissing => "ict_missing",
            GateReject::CandlestickPatternsMissing => "candlestick_patterns_missing",
            GateReject::VolatilityInsufficient => "volatility_insufficient",
            GateReject::ScoreBelowMin => "score_below_min",
        }
    }
}

pub use evaluator::{Evaluation, PlaybookEvaluator};

/// Parse a playbook catalog from TOML. The file holds a `[[playbook]]` array.
pub fn parse_catalog(toml_text: &str) -> Result<Vec<Playbook>, String> {
    #[derive(Deserialize)]
    struct CatalogFile {
        #[serde(default)]
        playbook: Vec<Playbook>,
    }

    let file: CatalogFile = toml::from_str(toml_text).map_err(|e| e.to_string())?;
    if file.playbook.is_empty() {
        return Err("playbook catalog is empty".into());
    }
    for pb in &file.playbook {
        pb.validate()?;
    }
    let mut names = std::collections::BTreeSet::new();
    for pb in &file.playbook {
        if !names.insert(&pb.name) {
            return Err(format!("duplicate playbook name '{}'", pb.name));
        }
    }
    Ok(file.playbook)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[[playbook]]
name = "NY_Open_Reversal"
category = "DAYTRADE"
structure_htf = ["uptrend", "downtrend"]
session_allowed = ["ny_am"]
day_type_allowed = ["manipulation_reversal"]
required_ict_families = ["sweep", "bos"]
required_candlestick_families = ["engulfing"]
time_windows = [["09:30", "10:30"]]
min_rr = 2.0
min_score = 0.55

[playbook.scoring_weights]
ict = 0.5
pattern = 0.3
context = 0.2
"#;

    #[test]
    fn catalog_parses_and_validates() {
        let catalog = parse_catalog(CATALOG).unwrap();
        assert_eq!(catalog.len(), 1);
        let pb = &catalog[0];
        assert_eq!(pb.name, "NY_Open_Reversal");
        assert_eq!(pb.category, TradeType::Daily);
        assert_eq!(pb.session_allowed, vec![Session::NyAm]);
        assert_eq!(pb.required_ict_families, vec![IctKind::Sweep, IctKind::Bos]);
        assert_eq!(pb.time_windows, vec![TimeWindow { start_min: 570, end_min: 630 }]);
    }

    #[test]
    fn empty_catalog_is_invalid() {
        assert!(parse_catalog("").is_err());
    }

    #[test]
    fn bad_weights_are_invalid() {
        let bad = CATALOG.replace("ict = 0.5", "ict = 0.9");
        assert!(parse_catalog(&bad).unwrap_err().contains("weights"));
    }

    #[test]
    fn bad_time_window_is_invalid() {
        let bad = CATALOG.replace("\"09:30\"", "\"25:99\"");
        assert!(parse_catalog(&bad).is_err());
    }

    #[test]
    fn inverted_time_window_is_invalid() {
        let bad = CATALOG.replace("[[\"09:30\", \"10:30\"]]", "[[\"10:30\", \"09:30\"]]");
        assert!(parse_catalog(&bad).is_err());
    }

    #[test]
    fn duplicate_names_are_invalid() {
        let dup = format!("{CATALOG}\n{CATALOG}");
        assert!(parse_catalog(&dup).unwrap_err().contains("duplicate"));
    }

    #[test]
    fn window_containment_is_inclusive() {
        let w = TimeWindow { start_min: 570, end_min: 630 };
        assert!(w.contains(570));
        assert!(w.contains(630));
        assert!(!w.contains(631));
    }
}
