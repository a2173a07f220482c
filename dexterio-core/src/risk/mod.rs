//! Risk gatekeeping: sizing, guardrails, two-tier dynamic risk.

pub mod engine;
pub mod two_tier;

pub use engine::{Admission, RiskConfig, RiskEngine, RiskReject};
pub use two_tier::{TwoTierRisk, TwoTierState};
