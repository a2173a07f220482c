//! Position lifecycle simulation.
//!
//! Owns all open positions. Entries fill at the next bar's open (or the
//! signal bar's close when configured); exits are stop, partial tp1 with a
//! breakeven move, tp2, time stop, and session close. When one bar touches
//! both the stop and a target, the configured intrabar policy decides which
//! fills; the default infers the path from the bar's close direction and
//! falls back to adverse-first on a flat bar.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::bar::Bar;
use crate::domain::setup::Setup;
use crate::domain::trade::{ExitReason, Outcome, TradeResult};
use crate::domain::types::{Direction, Session, TradeType};
use crate::risk::Admission;

use super::costs::{leg_costs, CostConfig, ExecutionCosts, FillSide};

/// When an admitted setup's entry order fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    #[default]
    NextBarOpen,
    SameBarClose,
}

/// Resolution when stop and target are both touched within one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntrabarPolicy {
    /// Adverse-first on a bar closing against the position, target-first
    /// otherwise; adverse-first when open equals close.
    #[default]
    CloseDirection,
    AdverseFirst,
    TargetFirst,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecConfig {
    pub fill_policy: FillPolicy,
    pub intrabar_policy: IntrabarPolicy,
    /// Scalps close at market after this holding time.
    pub scalp_max_duration_min: i64,
    /// Fraction of the position closed at tp1.
    pub tp1_exit_fraction: f64,
    pub cost: CostConfig,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            fill_policy: FillPolicy::NextBarOpen,
            intrabar_policy: IntrabarPolicy::CloseDirection,
            scalp_max_duration_min: 30,
            tp1_exit_fraction: 0.5,
            cost: CostConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct ExitLeg {
    ts: DateTime<Utc>,
    price: f64,
    shares: i64,
    reason: ExitReason,
    costs: ExecutionCosts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionState {
    Working,
    Open,
}

/// One live position.
#[derive(Debug, Clone)]
pub struct Position {
    pub setup: Setup,
    state: PositionState,
    shares_total: i64,
    shares_open: i64,
    risk_tier: u8,
    risk_pct: f64,
    entry_ts: DateTime<Utc>,
    entry_price: f64,
    entry_costs: ExecutionCosts,
    /// Stop distance at entry; r-multiples use this even after the stop
    /// moves to breakeven.
    initial_stop: f64,
    stop: f64,
    tp1: f64,
    tp2: f64,
    tp1_taken: bool,
    legs: Vec<ExitLeg>,
}

impl Position {
    fn direction(&self) -> Direction {
        self.setup.direction
    }

    fn exit_side(&self) -> FillSide {
        match self.direction() {
            Direction::Long => FillSide::Sell,
            Direction::Short => FillSide::Buy,
        }
    }

    fn entry_side(&self) -> FillSide {
        match self.direction() {
            Direction::Long => FillSide::Buy,
            Direction::Short => FillSide::Sell,
        }
    }
}

/// The simulator: admitted setups in, closed trades out.
#[derive(Debug)]
pub struct ExecutionSimulator {
    config: ExecConfig,
    /// `initial_capital * base_risk_pct`; denominator of `pnl_r_account`.
    base_r_unit: f64,
    positions: Vec<Position>,
}

impl ExecutionSimulator {
    pub fn new(config: ExecConfig, base_r_unit: f64) -> Self {
        Self { config, base_r_unit, positions: Vec::new() }
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.iter().any(|p| p.setup.symbol == symbol)
    }

    pub fn has_position_in_direction(&self, symbol: &str, direction: Direction) -> bool {
        self.positions
            .iter()
            .any(|p| p.setup.symbol == symbol && p.setup.direction == direction)
    }

    /// Accept an admitted setup. Under `SameBarClose` the entry fills now at
    /// the signal bar's close; otherwise it fills at the next bar's open.
    pub fn submit(&mut self, setup: Setup, admission: Admission, signal_bar: &Bar) {
        let mut position = Position {
            state: PositionState::Working,
            shares_total: admission.shares,
            shares_open: admission.shares,
            risk_tier: admission.risk_tier,
            risk_pct: admission.risk_pct,
            entry_ts: signal_bar.timestamp,
            entry_price: setup.entry,
            entry_costs: ExecutionCosts::default(),
            initial_stop: setup.stop,
            stop: setup.stop,
            tp1: setup.tp1,
            tp2: setup.tp2,
            tp1_taken: false,
            legs: Vec::new(),
            setup,
        };

        if self.config.fill_policy == FillPolicy::SameBarClose {
            Self::fill_entry(&mut position, signal_bar.close, signal_bar.timestamp, &self.config.cost);
        }
        debug!(
            symbol = %position.setup.symbol,
            direction = %position.setup.direction,
            shares = position.shares_total,
            "position submitted"
        );
        self.positions.push(position);
    }

    fn fill_entry(position: &mut Position, price: f64, ts: DateTime<Utc>, cost: &CostConfig) {
        position.entry_price = price;
        position.entry_ts = ts;
        position.entry_costs = leg_costs(position.shares_total, price, position.entry_side(), cost);
        // keep the stop's distance as planned, re-anchored on the real fill
        let planned = position.setup.stop_distance();
        position.stop = match position.direction() {
            Direction::Long => price - planned,
            Direction::Short => price + planned,
        };
        position.initial_stop = position.stop;
        position.tp1 = price + position.direction().sign() * (position.setup.tp1 - position.setup.entry).abs();
        position.tp2 = price + position.direction().sign() * (position.setup.tp2 - position.setup.entry).abs();
        position.state = PositionState::Open;
    }

    /// Advance all positions of the bar's symbol by one bar. Returns trades
    /// fully closed on this bar.
    pub fn on_bar(&mut self, bar: &Bar, session: Session) -> Vec<TradeResult> {
        let mut closed = Vec::new();

        for i in 0..self.positions.len() {
            if self.positions[i].setup.symbol != bar.symbol {
                continue;
            }
            if self.positions[i].state == PositionState::Working {
                // skip the signal bar itself; the entry fills on the bar after it
                if bar.timestamp <= self.positions[i].entry_ts {
                    continue;
                }
                let cost = self.config.cost;
                Self::fill_entry(&mut self.positions[i], bar.open, bar.timestamp, &cost);
            }
            self.step_position(i, bar, session);
        }

        self.positions.retain_mut(|p| {
            if p.state == PositionState::Open && p.shares_open == 0 {
                closed.push(Self::finalize(p, self.base_r_unit));
                false
            } else {
                true
            }
        });

        closed
    }

    fn step_position(&mut self, idx: usize, bar: &Bar, session: Session) {
        let cost = self.config.cost;
        let policy = self.config.intrabar_policy;
        let tp1_fraction = self.config.tp1_exit_fraction;
        let scalp_max = Duration::minutes(self.config.scalp_max_duration_min);
        let p = &mut self.positions[idx];
        if p.state != PositionState::Open || p.shares_open == 0 {
            return;
        }

        let dir = p.direction();
        let stop_hit = match dir {
            Direction::Long => bar.low <= p.stop,
            Direction::Short => bar.high >= p.stop,
        };
        let tp1_hit = !p.tp1_taken
            && match dir {
                Direction::Long => bar.high >= p.tp1,
                Direction::Short => bar.low <= p.tp1,
            };
        let tp2_hit = match dir {
            Direction::Long => bar.high >= p.tp2,
            Direction::Short => bar.low <= p.tp2,
        };

        if stop_hit && (tp1_hit || tp2_hit) {
            let adverse_first = match policy {
                IntrabarPolicy::AdverseFirst => true,
                IntrabarPolicy::TargetFirst => false,
                IntrabarPolicy::CloseDirection => {
                    if bar.close == bar.open {
                        true
                    } else {
                        // a bar closing against the position is assumed to
                        // have traded the adverse extreme first
                        match dir {
                            Direction::Long => bar.close < bar.open,
                            Direction::Short => bar.close > bar.open,
                        }
                    }
                }
            };
            if adverse_first {
                let stop = p.stop;
                Self::close_leg(p, bar.timestamp, stop, p.shares_open, ExitReason::Stop, &cost);
                return;
            }
            // target path: tp1 partial (if armed), then tp2 for the rest;
            // the bar's stop touch is attributed to the pre-target path
            if tp1_hit {
                Self::take_tp1(p, bar.timestamp, tp1_fraction, &cost);
            }
            if tp2_hit && p.shares_open > 0 {
                let tp2 = p.tp2;
                Self::close_leg(p, bar.timestamp, tp2, p.shares_open, ExitReason::Tp2, &cost);
            }
            return;
        }

        if stop_hit {
            let stop = p.stop;
            Self::close_leg(p, bar.timestamp, stop, p.shares_open, ExitReason::Stop, &cost);
            return;
        }

        if tp1_hit {
            Self::take_tp1(p, bar.timestamp, tp1_fraction, &cost);
            if p.shares_open == 0 {
                return;
            }
        }
        if tp2_hit && p.shares_open > 0 && p.tp1_taken {
            let tp2 = p.tp2;
            Self::close_leg(p, bar.timestamp, tp2, p.shares_open, ExitReason::Tp2, &cost);
            return;
        }

        // time stops: scalps by holding time, daytrades by the end of ny_pm
        if p.setup.trade_type == TradeType::Scalp && bar.timestamp - p.entry_ts >= scalp_max {
            Self::close_leg(p, bar.timestamp, bar.close, p.shares_open, ExitReason::TimeStop, &cost);
            return;
        }
        if p.setup.trade_type == TradeType::Daily
            && session == Session::NyPm
            && crate::market::et_minute_of_day(bar.timestamp) >= 959
        {
            Self::close_leg(p, bar.timestamp, bar.close, p.shares_open, ExitReason::TimeStop, &cost);
            return;
        }

        if session == Session::Off && p.shares_open > 0 {
            Self::close_leg(p, bar.timestamp, bar.close, p.shares_open, ExitReason::SessionClose, &cost);
        }
    }

    fn take_tp1(p: &mut Position, ts: DateTime<Utc>, fraction: f64, cost: &CostConfig) {
        let partial = ((p.shares_open as f64) * fraction).floor() as i64;
        let tp1 = p.tp1;
        if partial == 0 {
            // too small to split: the touch closes the whole position
            Self::close_leg(p, ts, tp1, p.shares_open, ExitReason::Tp1, cost);
            return;
        }
        Self::close_leg(p, ts, tp1, partial, ExitReason::Tp1, cost);
        p.tp1_taken = true;
        p.stop = p.entry_price;
    }

    fn close_leg(
        p: &mut Position,
        ts: DateTime<Utc>,
        price: f64,
        shares: i64,
        reason: ExitReason,
        cost: &CostConfig,
    ) {
        let costs = leg_costs(shares, price, p.exit_side(), cost);
        p.legs.push(ExitLeg { ts, price, shares, reason, costs });
        p.shares_open -= shares;
        if reason == ExitReason::Tp1 && p.shares_open == 0 {
            p.tp1_taken = true;
        }
    }

    /// Force-close everything at the given price (end of data); artifacts
    /// record it as a session close.
    pub fn liquidate_all(&mut self, ts: DateTime<Utc>, price_of: impl Fn(&str) -> f64) -> Vec<TradeResult> {
        let cost = self.config.cost;
        let mut closed = Vec::new();
        for p in &mut self.positions {
            if p.state == PositionState::Working {
                continue;
            }
            let price = price_of(&p.setup.symbol);
            if p.shares_open > 0 {
                Self::close_leg(p, ts, price, p.shares_open, ExitReason::SessionClose, &cost);
            }
            closed.push(Self::finalize(p, self.base_r_unit));
        }
        self.positions.clear();
        closed
    }

    fn finalize(p: &Position, base_r_unit: f64) -> TradeResult {
        let dir = p.direction().sign();
        let exit_shares: i64 = p.legs.iter().map(|l| l.shares).sum();
        debug_assert_eq!(exit_shares, p.shares_total);

        let pnl_gross: f64 =
            p.legs.iter().map(|l| dir * (l.price - p.entry_price) * l.shares as f64).sum();
        let exit_notional: f64 = p.legs.iter().map(|l| l.price * l.shares as f64).sum();
        let exit_price = exit_notional / exit_shares as f64;

        let exit_commission: f64 = p.legs.iter().map(|l| l.costs.commission).sum();
        let exit_reg_fees: f64 = p.legs.iter().map(|l| l.costs.regulatory_fees).sum();
        let exit_slippage: f64 = p.legs.iter().map(|l| l.costs.slippage).sum();
        let exit_spread: f64 = p.legs.iter().map(|l| l.costs.spread_cost).sum();
        let total_costs = p.entry_costs.total + exit_commission + exit_reg_fees + exit_slippage + exit_spread;

        let pnl_net = pnl_gross - total_costs;
        let risk_dollars = p.shares_total as f64 * (p.entry_price - p.initial_stop).abs();
        let r_multiple = if risk_dollars > 0.0 { pnl_net / risk_dollars } else { 0.0 };
        let pnl_gross_r = if risk_dollars > 0.0 { pnl_gross / risk_dollars } else { 0.0 };
        let pnl_r_account = if base_r_unit > 0.0 { pnl_net / base_r_unit } else { 0.0 };

        let last_leg = p.legs.last().expect("closed position has legs");

        TradeResult {
            setup_id: p.setup.id.clone(),
            playbook_name: p.setup.playbook_name.clone(),
            symbol: p.setup.symbol.clone(),
            direction: p.setup.direction,
            trade_type: p.setup.trade_type,
            quality: p.setup.quality,
            shares: p.shares_total,
            entry_ts: p.entry_ts,
            entry_price: p.entry_price,
            exit_ts: last_leg.ts,
            exit_price,
            stop: p.initial_stop,
            entry_commission: p.entry_costs.commission,
            entry_reg_fees: p.entry_costs.regulatory_fees,
            entry_slippage: p.entry_costs.slippage,
            entry_spread_cost: p.entry_costs.spread_cost,
            exit_commission,
            exit_reg_fees,
            exit_slippage,
            exit_spread_cost: exit_spread,
            total_costs,
            pnl_gross,
            pnl_net,
            r_multiple,
            pnl_gross_r,
            pnl_r_account,
            risk_tier: p.risk_tier,
            risk_pct: p.risk_pct,
            outcome: Outcome::from_net_pnl(pnl_net),
            exit_reason: last_leg.reason,
        }
    }
}
