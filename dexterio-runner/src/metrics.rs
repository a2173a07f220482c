//! Aggregate performance metrics over the trade ledger.
//!
//! Formulas are locked:
//! - profit factor: sum of positive R over |sum of negative R|, breakeven
//!   excluded; `inf` when there are no losses but some profit, `NaN` when
//!   there are neither
//! - expectancy: mean R including breakeven
//! - max drawdown: largest peak-to-trough fall of the cumulative R curve
//! - winrate: wins / (wins + losses), breakeven excluded
//!
//! Every aggregate is computed twice, on net and on gross R; the default
//! reporting surface is net.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use dexterio_core::domain::{Outcome, TradeResult};
use dexterio_core::market::et_date;

/// One slice of metrics (the whole run, one playbook, or one day).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceMetrics {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakevens: usize,
    pub total_r: f64,
    pub winrate: f64,
    pub profit_factor: f64,
    pub expectancy_r: f64,
    pub max_drawdown_r: f64,
}

/// Net and gross views over the same slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsPair {
    pub net: SliceMetrics,
    pub gross: SliceMetrics,
}

/// The full metrics report persisted into `summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub overall: MetricsPair,
    pub total_costs: f64,
    pub avg_cost_per_trade: f64,
    /// Run total in account-R (`pnl_r_account` summed over the ledger).
    pub total_r_account: f64,
    pub per_playbook: BTreeMap<String, MetricsPair>,
    pub per_day: BTreeMap<NaiveDate, MetricsPair>,
}

fn r_values(trades: &[&TradeResult], net: bool) -> Vec<f64> {
    trades.iter().map(|t| if net { t.r_multiple } else { t.pnl_gross_r }).collect()
}

fn slice_metrics(trades: &[&TradeResult], net: bool) -> SliceMetrics {
    let rs = r_values(trades, net);

    let mut wins = 0;
    let mut losses = 0;
    let mut breakevens = 0;
    for t in trades {
        // the outcome of a slice member is judged on the same surface the
        // slice reports
        let r = if net { t.r_multiple } else { t.pnl_gross_r };
        if r > 0.0 {
            wins += 1;
        } else if r < 0.0 {
            losses += 1;
        } else {
            breakevens += 1;
        }
    }

    SliceMetrics {
        trades: trades.len(),
        wins,
        losses,
        breakevens,
        total_r: rs.iter().sum(),
        winrate: winrate(wins, losses),
        profit_factor: profit_factor(&rs),
        expectancy_r: expectancy(&rs),
        max_drawdown_r: max_drawdown_r(&rs),
    }
}

/// wins / (wins + losses); breakeven excluded from the denominator.
pub fn winrate(wins: usize, losses: usize) -> f64 {
    let denom = wins + losses;
    if denom == 0 {
        return 0.0;
    }
    wins as f64 / denom as f64
}

/// Σ(+R) / |Σ(−R)|, breakeven excluded. `inf` with profits and no losses;
/// `NaN` with neither.
pub fn profit_factor(rs: &[f64]) -> f64 {
    let profits: f64 = rs.iter().filter(|r| **r > 0.0).sum();
    let losses: f64 = rs.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();
    if losses == 0.0 {
        if profits > 0.0 {
            return f64::INFINITY;
        }
        return f64::NAN;
    }
    profits / losses
}

/// Mean R over all trades, breakeven included.
pub fn expectancy(rs: &[f64]) -> f64 {
    if rs.is_empty() {
        return 0.0;
    }
    rs.iter().sum::<f64>() / rs.len() as f64
}

/// Max peak-to-trough fall of the cumulative R curve.
pub fn max_drawdown_r(rs: &[f64]) -> f64 {
    let mut equity = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut max_dd = 0.0_f64;
    for r in rs {
        equity += r;
        if equity > peak {
            peak = equity;
        }
        let dd = peak - equity;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}

impl MetricsReport {
    pub fn compute(trades: &[TradeResult]) -> Self {
        let refs: Vec<&TradeResult> = trades.iter().collect();
        let overall =
            MetricsPair { net: slice_metrics(&refs, true), gross: slice_metrics(&refs, false) };

        let total_costs: f64 = trades.iter().map(|t| t.total_costs).sum();
        let avg_cost_per_trade =
            if trades.is_empty() { 0.0 } else { total_costs / trades.len() as f64 };
        let total_r_account: f64 = trades.iter().map(|t| t.pnl_r_account).sum();

        let mut per_playbook: BTreeMap<String, Vec<&TradeResult>> = BTreeMap::new();
        for t in trades {
            per_playbook.entry(t.playbook_name.clone()).or_default().push(t);
        }
        let per_playbook = per_playbook
            .into_iter()
            .map(|(name, slice)| {
                (
                    name,
                    MetricsPair {
                        net: slice_metrics(&slice, true),
                        gross: slice_metrics(&slice, false),
                    },
                )
            })
            .collect();

        let mut per_day: BTreeMap<NaiveDate, Vec<&TradeResult>> = BTreeMap::new();
        for t in trades {
            per_day.entry(et_date(t.entry_ts)).or_default().push(t);
        }
        let per_day = per_day
            .into_iter()
            .map(|(day, slice)| {
                (
                    day,
                    MetricsPair {
                        net: slice_metrics(&slice, true),
                        gross: slice_metrics(&slice, false),
                    },
                )
            })
            .collect();

        Self { overall, total_costs, avg_cost_per_trade, total_r_account, per_playbook, per_day }
    }
}

/// Count outcomes on the canonical (net-dollar) surface.
pub fn outcome_counts(trades: &[TradeResult]) -> (usize, usize, usize) {
    let mut w = 0;
    let mut l = 0;
    let mut b = 0;
    for t in trades {
        match t.outcome {
            Outcome::Win => w += 1,
            Outcome::Loss => l += 1,
            Outcome::Breakeven => b += 1,
        }
    }
    (w, l, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dexterio_core::domain::types::{Direction, Grade, TradeType};
    use dexterio_core::domain::ExitReason;

    fn trade(playbook: &str, day: u32, r_net: f64, r_gross: f64, costs: f64) -> TradeResult {
        let ts = Utc.with_ymd_and_hms(2025, 8, day, 14, 0, 0).unwrap();
        TradeResult {
            setup_id: "s".into(),
            playbook_name: playbook.into(),
            symbol: "SPY".into(),
            direction: Direction::Long,
            trade_type: TradeType::Daily,
            quality: Grade::A,
            shares: 100,
            entry_ts: ts,
            entry_price: 100.0,
            exit_ts: ts,
            exit_price: 100.0 + r_net,
            stop: 99.0,
            entry_commission: costs / 2.0,
            entry_reg_fees: 0.0,
            entry_slippage: 0.0,
            entry_spread_cost: 0.0,
            exit_commission: costs / 2.0,
            exit_reg_fees: 0.0,
            exit_slippage: 0.0,
            exit_spread_cost: 0.0,
            total_costs: costs,
            pnl_gross: r_gross * 100.0,
            pnl_net: r_net * 100.0,
            r_multiple: r_net,
            pnl_gross_r: r_gross,
            pnl_r_account: r_net,
            risk_tier: 2,
            risk_pct: 0.02,
            outcome: Outcome::from_net_pnl(r_net),
            exit_reason: ExitReason::Tp1,
        }
    }

    #[test]
    fn profit_factor_edges() {
        assert!((profit_factor(&[2.0, -1.0, 1.0]) - 3.0).abs() < 1e-12);
        assert!(profit_factor(&[1.0, 2.0]).is_infinite());
        assert!(profit_factor(&[]).is_nan());
        assert!(profit_factor(&[0.0, 0.0]).is_nan());
    }

    #[test]
    fn breakeven_excluded_from_pf_but_not_expectancy() {
        let rs = [2.0, 0.0, -1.0];
        assert!((profit_factor(&rs) - 2.0).abs() < 1e-12);
        assert!((expectancy(&rs) - (1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn max_drawdown_peak_to_trough() {
        // +3, -1, -2, +4: peak 3, trough 0 -> dd 3
        assert!((max_drawdown_r(&[3.0, -1.0, -2.0, 4.0]) - 3.0).abs() < 1e-12);
        // monotone up: no drawdown
        assert_eq!(max_drawdown_r(&[1.0, 1.0, 1.0]), 0.0);
        // first trade loses: drawdown from zero
        assert!((max_drawdown_r(&[-2.0, 1.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn winrate_excludes_breakeven() {
        assert!((winrate(2, 2) - 0.5).abs() < 1e-12);
        assert_eq!(winrate(0, 0), 0.0);
    }

    #[test]
    fn report_computes_net_and_gross_views() {
        let trades = vec![
            trade("A", 1, 1.8, 2.0, 20.0),
            trade("A", 1, -1.1, -1.0, 10.0),
            trade("B", 2, 0.9, 1.0, 10.0),
        ];
        let report = MetricsReport::compute(&trades);

        assert_eq!(report.overall.net.trades, 3);
        assert_eq!(report.overall.net.wins, 2);
        assert_eq!(report.overall.net.losses, 1);
        assert!((report.overall.net.total_r - 1.6).abs() < 1e-12);
        assert!((report.overall.gross.total_r - 2.0).abs() < 1e-12);
        // net PF = (1.8+0.9)/1.1; gross PF = 3.0
        assert!((report.overall.net.profit_factor - 2.7 / 1.1).abs() < 1e-12);
        assert!((report.overall.gross.profit_factor - 3.0).abs() < 1e-12);
        assert!((report.total_costs - 40.0).abs() < 1e-12);
        assert!((report.avg_cost_per_trade - 40.0 / 3.0).abs() < 1e-12);

        assert_eq!(report.per_playbook.len(), 2);
        assert_eq!(report.per_playbook["A"].net.trades, 2);
        assert_eq!(report.per_day.len(), 2);
    }

    #[test]
    fn empty_ledger_report_is_well_formed() {
        let report = MetricsReport::compute(&[]);
        assert_eq!(report.overall.net.trades, 0);
        assert_eq!(report.overall.net.winrate, 0.0);
        assert!(report.overall.net.profit_factor.is_nan());
        assert_eq!(report.total_costs, 0.0);
    }
}
