//! Execution cost model: commission, US regulatory fees, slippage, spread.
//!
//! Costs are dollar amounts per fill leg, always adverse to the trade.
//! Regulatory fees apply on sell legs only (close of a long, open of a
//! short).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommissionModel {
    #[default]
    IbkrFixed,
    IbkrTiered,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlippageModel {
    #[default]
    Pct,
    Ticks,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpreadModel {
    #[default]
    FixedBps,
    None,
}

/// Which side of the book a leg hits; fees care about sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSide {
    Buy,
    Sell,
}

/// Full cost configuration for a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostConfig {
    pub commission_model: CommissionModel,
    pub enable_reg_fees: bool,
    pub slippage_model: SlippageModel,
    pub slippage_pct: f64,
    pub slippage_ticks: u32,
    pub spread_model: SpreadModel,
    pub spread_bps: f64,
    pub tick_size: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            commission_model: CommissionModel::IbkrFixed,
            enable_reg_fees: true,
            slippage_model: SlippageModel::Pct,
            slippage_pct: 0.0005,
            slippage_ticks: 1,
            spread_model: SpreadModel::FixedBps,
            spread_bps: 2.0,
            tick_size: 0.01,
        }
    }
}

impl CostConfig {
    /// All-free configuration; net equals gross under it.
    pub fn frictionless() -> Self {
        Self {
            commission_model: CommissionModel::None,
            enable_reg_fees: false,
            slippage_model: SlippageModel::None,
            slippage_pct: 0.0,
            slippage_ticks: 0,
            spread_model: SpreadModel::None,
            spread_bps: 0.0,
            tick_size: 0.01,
        }
    }
}

/// Cost breakdown of one fill leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCosts {
    pub commission: f64,
    pub regulatory_fees: f64,
    pub slippage: f64,
    pub spread_cost: f64,
    pub total: f64,
}

/// Broker commission for US stocks/ETFs.
///
/// ibkr_fixed: max($1, shares * $0.005); ibkr_tiered: max($1, shares * $0.0035).
pub fn commission(shares: i64, model: CommissionModel) -> f64 {
    let shares = shares as f64;
    match model {
        CommissionModel::IbkrFixed => (shares * 0.005).max(1.0),
        CommissionModel::IbkrTiered => (shares * 0.0035).max(1.0),
        CommissionModel::None => 0.0,
    }
}

/// SEC fee + FINRA TAF, sells only.
pub fn regulatory_fees(shares: i64, price: f64, side: FillSide) -> f64 {
    if side == FillSide::Buy {
        return 0.0;
    }
    let notional = shares as f64 * price;
    let sec_fee = notional * 5.10e-6;
    let finra_taf = (shares as f64 * 0.000145).min(7.27);
    sec_fee + finra_taf
}

/// Slippage cost, always adverse.
pub fn slippage(shares: i64, price: f64, config: &CostConfig) -> f64 {
    match config.slippage_model {
        SlippageModel::Pct => price * config.slippage_pct * shares as f64,
        SlippageModel::Ticks => shares as f64 * config.tick_size * config.slippage_ticks as f64,
        SlippageModel::None => 0.0,
    }
}

/// Half-spread paid per leg.
pub fn spread_cost(shares: i64, price: f64, config: &CostConfig) -> f64 {
    match config.spread_model {
        SpreadModel::FixedBps => shares as f64 * price * config.spread_bps * 1e-4 * 0.5,
        SpreadModel::None => 0.0,
    }
}

/// Total costs of one leg.
pub fn leg_costs(shares: i64, price: f64, side: FillSide, config: &CostConfig) -> ExecutionCosts {
    let commission = commission(shares, config.commission_model);
    let regulatory_fees =
        if config.enable_reg_fees { regulatory_fees(shares, price, side) } else { 0.0 };
    let slippage = slippage(shares, price, config);
    let spread_cost = spread_cost(shares, price, config);
    ExecutionCosts {
        commission,
        regulatory_fees,
        slippage,
        spread_cost,
        total: commission + regulatory_fees + slippage + spread_cost,
    }
}
