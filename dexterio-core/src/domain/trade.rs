//! Closed-trade accounting records and the equity ledger point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Direction, Grade, TradeType};

/// Why a position (or its final leg) exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Stop,
    Tp1,
    Tp2,
    TimeStop,
    SessionClose,
}

/// Win/loss/breakeven classification of the net result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    Breakeven,
}

impl Outcome {
    /// `win` iff net > 0, `loss` iff net < 0, else `breakeven`.
    pub fn from_net_pnl(pnl_net: f64) -> Self {
        if pnl_net > 0.0 {
            Outcome::Win
        } else if pnl_net < 0.0 {
            Outcome::Loss
        } else {
            Outcome::Breakeven
        }
    }
}

/// One fully closed trade, with the cost breakdown of both legs.
///
/// Invariant: `pnl_net == pnl_gross - total_costs` and `outcome` is
/// determined by `pnl_net`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub setup_id: String,
    pub playbook_name: String,
    pub symbol: String,
    pub direction: Direction,
    pub trade_type: TradeType,
    pub quality: Grade,

    pub shares: i64,
    pub entry_ts: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_ts: DateTime<Utc>,
    /// Share-weighted average across exit legs.
    pub exit_price: f64,
    pub stop: f64,

    pub entry_commission: f64,
    pub entry_reg_fees: f64,
    pub entry_slippage: f64,
    pub entry_spread_cost: f64,
    pub exit_commission: f64,
    pub exit_reg_fees: f64,
    pub exit_slippage: f64,
    pub exit_spread_cost: f64,
    pub total_costs: f64,

    pub pnl_gross: f64,
    pub pnl_net: f64,
    /// Net PnL over the dollar risk actually taken (`shares * |entry - stop|`).
    pub r_multiple: f64,
    pub pnl_gross_r: f64,
    /// Net PnL over the fixed account unit (`initial_capital * base_risk_pct`),
    /// immune to per-trade sizing tier changes.
    pub pnl_r_account: f64,
    /// Risk tier at entry: 1 = reduced, 2 = base (in units of reduced risk).
    pub risk_tier: u8,
    pub risk_pct: f64,

    pub outcome: Outcome,
    pub exit_reason: ExitReason,
}

impl TradeResult {
    pub fn risk_dollars(&self) -> f64 {
        self.shares as f64 * (self.entry_price - self.stop).abs()
    }
}

/// One point of the equity curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cumulative_r: f64,
    pub drawdown_r: f64,
}
