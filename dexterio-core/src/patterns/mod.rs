//! Pattern detection: ICT structures and candlestick geometry.
//!
//! Detections are a tagged sum — consumers dispatch on the variant instead
//! of probing optional fields.

pub mod candlestick;
pub mod ict;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Polarity;
use crate::timeframe::Timeframe;

/// ICT pattern kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IctKind {
    Bos,
    Choch,
    Fvg,
    Sweep,
    OrderBlock,
}

/// One ICT detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IctDetection {
    pub kind: IctKind,
    pub direction: Polarity,
    pub strength: f64,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    /// Price levels the pattern references (broken pivot, swept level, gap
    /// edges, zone edges).
    pub level_refs: Vec<f64>,
    /// Price at which the pattern is wrong; setups anchor their stop here.
    pub invalidation: f64,
    /// Optional preferred entry anchor (FVG midpoint, order-block midpoint).
    pub anchor: Option<f64>,
}

/// Candlestick families, fixed by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleFamily {
    Engulfing,
    Hammer,
    Star,
    Doji,
    SoldiersCrows,
    Marubozu,
    Harami,
    Piercing,
    BeltHold,
    Tweezer,
    Kicker,
    AbandonedBaby,
}

/// One candlestick detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandlestickDetection {
    pub family: CandleFamily,
    pub name: String,
    pub direction: Polarity,
    pub strength: f64,
    pub body_ratio: f64,
    pub confirmation: bool,
    pub at_level: bool,
    pub after_sweep: bool,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
}

/// Tagged union over both pattern families.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum PatternDetection {
    Ict(IctDetection),
    Candlestick(CandlestickDetection),
}

pub use candlestick::CandlestickEngine;
pub use ict::IctEngine;
