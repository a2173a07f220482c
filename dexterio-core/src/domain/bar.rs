use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Single one-minute OHLCV bar with UTC timestamp and symbol.
///
/// Bars are created by the data layer and read-only downstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self { timestamp, symbol: symbol.into(), open, high, low, close, volume }
    }

    /// Validate bar invariants: `l <= min(o,c) <= max(o,c) <= h`, `v >= 0`, no NaN.
    pub fn validate(&self) -> Result<(), BarError> {
        for (name, v) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ] {
            if !v.is_finite() {
                return Err(BarError::NonFinite { field: name, ts: self.timestamp });
            }
        }
        if self.high < self.low {
            return Err(BarError::InvalidRange { high: self.high, low: self.low });
        }
        if !(self.low..=self.high).contains(&self.open) {
            return Err(BarError::OpenOutOfRange);
        }
        if !(self.low..=self.high).contains(&self.close) {
            return Err(BarError::CloseOutOfRange);
        }
        if self.volume < 0.0 {
            return Err(BarError::NegativeVolume);
        }
        Ok(())
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// High minus low.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute body size.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Wick above the body.
    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    /// Wick below the body.
    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    /// Body as a fraction of the full range; zero-range bars report 0.
    pub fn body_ratio(&self) -> f64 {
        let range = self.range();
        if range > 0.0 {
            self.body() / range
        } else {
            0.0
        }
    }
}

#[derive(Debug, Error)]
pub enum BarError {
    #[error("invalid bar range: high={high}, low={low}")]
    InvalidRange { high: f64, low: f64 },

    #[error("non-finite {field} at {ts}")]
    NonFinite { field: &'static str, ts: DateTime<Utc> },

    #[error("open price outside high/low range")]
    OpenOutOfRange,

    #[error("close price outside high/low range")]
    CloseOutOfRange,

    #[error("negative volume not allowed")]
    NegativeVolume,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 13, 30, 0).unwrap()
    }

    #[test]
    fn validate_accepts_valid_bar() {
        let bar = Bar::new(ts(), "SPY", 100.0, 105.0, 95.0, 102.0, 1000.0);
        assert!(bar.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let bar = Bar::new(ts(), "SPY", 100.0, 99.0, 101.0, 100.0, 1000.0);
        assert!(matches!(bar.validate(), Err(BarError::InvalidRange { .. })));
    }

    #[test]
    fn validate_rejects_nan_close() {
        let bar = Bar::new(ts(), "SPY", 100.0, 105.0, 95.0, f64::NAN, 1000.0);
        assert!(matches!(bar.validate(), Err(BarError::NonFinite { field: "close", .. })));
    }

    #[test]
    fn validate_rejects_open_outside_range() {
        let bar = Bar::new(ts(), "SPY", 110.0, 105.0, 95.0, 100.0, 1000.0);
        assert!(matches!(bar.validate(), Err(BarError::OpenOutOfRange)));
    }

    #[test]
    fn validate_rejects_negative_volume() {
        let bar = Bar::new(ts(), "SPY", 100.0, 105.0, 95.0, 102.0, -1.0);
        assert!(matches!(bar.validate(), Err(BarError::NegativeVolume)));
    }

    #[test]
    fn wick_and_body_geometry() {
        let bar = Bar::new(ts(), "SPY", 100.0, 106.0, 98.0, 104.0, 1000.0);
        assert_eq!(bar.body(), 4.0);
        assert_eq!(bar.upper_wick(), 2.0);
        assert_eq!(bar.lower_wick(), 2.0);
        assert_eq!(bar.range(), 8.0);
        assert!((bar.body_ratio() - 0.5).abs() < 1e-12);
        assert!(bar.is_bullish());
    }
}
