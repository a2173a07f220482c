//! Two-tier dynamic risk state machine.
//!
//! Base risk until a loss; one trade at reduced risk after any loss; a win
//! restores base. Breakeven trades change nothing. The transition function
//! is total over (state, outcome).

use serde::{Deserialize, Serialize};

use crate::domain::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoTierState {
    T1Pending,
    T1WinSeekingT2,
    CooldownLoss,
    CooldownDay,
}

#[derive(Debug, Clone)]
pub struct TwoTierRisk {
    state: TwoTierState,
    base_pct: f64,
    reduced_pct: f64,
    /// Set by a loss, cleared by a win; survives the day-freeze state.
    reduced_active: bool,
}

impl TwoTierRisk {
    pub fn new(base_pct: f64, reduced_pct: f64) -> Self {
        Self { state: TwoTierState::T1Pending, base_pct, reduced_pct, reduced_active: false }
    }

    pub fn state(&self) -> TwoTierState {
        self.state
    }

    /// Risk fraction for the next trade.
    pub fn current_risk_pct(&self) -> f64 {
        if self.reduced_active {
            self.reduced_pct
        } else {
            self.base_pct
        }
    }

    /// Tier label recorded on trades: 2 = base, 1 = reduced.
    pub fn current_tier(&self) -> u8 {
        if self.reduced_active {
            1
        } else {
            2
        }
    }

    /// Apply a closed trade's outcome.
    pub fn on_trade_closed(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Breakeven => {}
            Outcome::Loss => {
                self.state = TwoTierState::CooldownLoss;
                self.reduced_active = true;
            }
            Outcome::Win => {
                self.reduced_active = false;
                self.state = match self.state {
                    TwoTierState::T1Pending => TwoTierState::T1WinSeekingT2,
                    TwoTierState::T1WinSeekingT2 => TwoTierState::T1Pending,
                    TwoTierState::CooldownLoss => TwoTierState::T1Pending,
                    TwoTierState::CooldownDay => TwoTierState::T1Pending,
                };
            }
        }
    }

    /// The daily circuit breaker freezes the rest of the day.
    pub fn freeze_day(&mut self) {
        self.state = TwoTierState::CooldownDay;
    }

    /// New ET day: leave the day freeze, keeping the reduced tier if the
    /// last outcome was a loss.
    pub fn on_new_day(&mut self) {
        if self.state == TwoTierState::CooldownDay {
            self.state = if self.reduced_active {
                TwoTierState::CooldownLoss
            } else {
                TwoTierState::T1Pending
            };
        }
    }
}
