//! Domain records shared across the pipeline.

pub mod bar;
pub mod setup;
pub mod trade;
pub mod types;

pub use bar::{Bar, BarError};
pub use setup::{PlaybookMatch, ScoreComponents, Setup, TriggerLevels};
pub use trade::{EquityPoint, ExitReason, Outcome, TradeResult};
pub use types::{Bias, DayType, Direction, Grade, Polarity, Session, Structure, TradeType, TradingMode};
