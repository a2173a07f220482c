//! Closed vocabularies shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Pattern/bias polarity as seen by the detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Bullish,
    Bearish,
}

impl Polarity {
    pub fn direction(self) -> Direction {
        match self {
            Polarity::Bullish => Direction::Long,
            Polarity::Bearish => Direction::Short,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Polarity::Bullish => Polarity::Bearish,
            Polarity::Bearish => Polarity::Bullish,
        }
    }
}

/// DAILY vs SCALP trade archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeType {
    Daily,
    Scalp,
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeType::Daily => write!(f, "DAILY"),
            TradeType::Scalp => write!(f, "SCALP"),
        }
    }
}

/// Setup quality grade from the playbook score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    C,
    B,
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl Grade {
    /// Grade thresholds: >= 0.85 A+, >= 0.70 A, >= 0.55 B, else C.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            Grade::APlus
        } else if score >= 0.70 {
            Grade::A
        } else if score >= 0.55 {
            Grade::B
        } else {
            Grade::C
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::APlus => write!(f, "A+"),
            Grade::A => write!(f, "A"),
            Grade::B => write!(f, "B"),
            Grade::C => write!(f, "C"),
        }
    }
}

/// HTF structure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Structure {
    Uptrend,
    Downtrend,
    Range,
    Unknown,
}

impl Structure {
    pub fn is_trending(self) -> bool {
        matches!(self, Structure::Uptrend | Structure::Downtrend)
    }
}

/// Daily directional bias derived from daily + 4h structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

/// Trading session in ET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Asia,
    London,
    NyAm,
    NyLunch,
    NyPm,
    Off,
}

impl Session {
    /// Kill-zones carry elevated probability: ny_am and ny_pm.
    pub fn is_kill_zone(self) -> bool {
        matches!(self, Session::NyAm | Session::NyPm)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Session::Asia => "asia",
            Session::London => "london",
            Session::NyAm => "ny_am",
            Session::NyLunch => "ny_lunch",
            Session::NyPm => "ny_pm",
            Session::Off => "off",
        };
        write!(f, "{s}")
    }
}

/// Day classification used by the playbook day-type gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayType {
    Trend,
    ManipulationReversal,
    Range,
    Unknown,
}

/// SAFE or AGGRESSIVE run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingMode {
    Safe,
    Aggressive,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Safe => write!(f, "SAFE"),
            TradingMode::Aggressive => write!(f, "AGGRESSIVE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_thresholds() {
        assert_eq!(Grade::from_score(0.85), Grade::APlus);
        assert_eq!(Grade::from_score(0.84), Grade::A);
        assert_eq!(Grade::from_score(0.70), Grade::A);
        assert_eq!(Grade::from_score(0.55), Grade::B);
        assert_eq!(Grade::from_score(0.54), Grade::C);
    }

    #[test]
    fn grade_ordering_follows_quality() {
        assert!(Grade::APlus > Grade::A);
        assert!(Grade::A > Grade::B);
        assert!(Grade::B > Grade::C);
    }

    #[test]
    fn direction_sign_and_opposite() {
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
        assert_eq!(Direction::Long.opposite(), Direction::Short);
    }

    #[test]
    fn kill_zones_are_ny_sessions() {
        assert!(Session::NyAm.is_kill_zone());
        assert!(Session::NyPm.is_kill_zone());
        assert!(!Session::NyLunch.is_kill_zone());
        assert!(!Session::London.is_kill_zone());
    }

    #[test]
    fn serde_round_trip_uses_wire_names() {
        assert_eq!(serde_json::to_string(&Grade::APlus).unwrap(), "\"A+\"");
        assert_eq!(serde_json::to_string(&Session::NyAm).unwrap(), "\"ny_am\"");
        assert_eq!(serde_json::to_string(&TradingMode::Safe).unwrap(), "\"SAFE\"");
        assert_eq!(serde_json::to_string(&DayType::ManipulationReversal).unwrap(), "\"manipulation_reversal\"");
    }
}
