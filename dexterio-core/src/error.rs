//! Engine-internal error taxonomy.
//!
//! `GateReject` and `RiskReject` are values, not errors — see
//! `playbook::GateReject` and `risk::RiskReject`. Only genuine invariant
//! violations and component failures surface through these types.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Internal invariant violation. Aborts the run with full context; a bug,
/// not a recoverable condition.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("{component}: out-of-order bar for {symbol}: {ts} after {last_ts}")]
    OutOfOrderBar {
        component: &'static str,
        symbol: String,
        ts: DateTime<Utc>,
        last_ts: DateTime<Utc>,
    },

    #[error("{component}: duplicate bar for {symbol} at {ts}")]
    DuplicateBar {
        component: &'static str,
        symbol: String,
        ts: DateTime<Utc>,
    },

    #[error("{component}: {symbol} at {ts}: {detail}")]
    Invariant {
        component: &'static str,
        symbol: String,
        ts: DateTime<Utc>,
        detail: String,
    },
}
