//! Market-state derivation: sessions, structure, liquidity, snapshots.

pub mod liquidity;
pub mod session;
pub mod state;
pub mod structure;

pub use liquidity::{LevelKind, LiquidityLevel, LiquidityTracker};
pub use session::{et_date, et_minute_of_day, session_at};
pub use state::{DayPatternLog, Fingerprint, HtfSnapshot, MarketState, MarketStateEngine};
pub use structure::{atr, detect_structure, pivot_points};
