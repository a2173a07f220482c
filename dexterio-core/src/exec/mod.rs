//! Execution simulation: fills, exits, and the cost model.

pub mod costs;
pub mod simulator;

pub use costs::{
    leg_costs, CommissionModel, CostConfig, ExecutionCosts, FillSide, SlippageModel, SpreadModel,
};
pub use simulator::{ExecConfig, ExecutionSimulator, FillPolicy, IntrabarPolicy, Position};
