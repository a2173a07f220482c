//! Artifact export: `summary.json`, `trades.parquet`, `equity.parquet`,
//! `debug_counts.json`, optional `market_state_stream.parquet`.
//!
//! Parquet writes are atomic: write to a `.tmp` sibling, rename into place.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use polars::prelude::*;
use std::path::Path;

use dexterio_core::domain::{EquityPoint, TradeResult};

use crate::instrument::DebugCounts;
use crate::metrics::MetricsReport;
use crate::runner::MarketStateRow;

fn write_parquet_atomic(mut df: DataFrame, path: &Path) -> Result<()> {
    let tmp = path.with_extension("parquet.tmp");
    let file = std::fs::File::create(&tmp)
        .with_context(|| format!("create {}", tmp.display()))?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .with_context(|| format!("write parquet {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| {
        let _ = std::fs::remove_file(&tmp);
        format!("rename {} into place", path.display())
    })?;
    Ok(())
}

fn millis_column(name: &str, values: Vec<i64>) -> Result<Column> {
    Column::new(name.into(), values)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
        .with_context(|| format!("cast column {name}"))
}

/// Closed-trade ledger, one row per trade, schema mirroring `TradeResult`.
pub fn write_trades_parquet(trades: &[TradeResult], path: &Path) -> Result<()> {
    macro_rules! col {
        ($name:expr, $f:expr) => {
            Column::new($name.into(), trades.iter().map($f).collect::<Vec<_>>())
        };
    }

    let df = DataFrame::new(vec![
        col!("setup_id", |t: &TradeResult| t.setup_id.clone()),
        col!("playbook", |t: &TradeResult| t.playbook_name.clone()),
        col!("symbol", |t: &TradeResult| t.symbol.clone()),
        col!("direction", |t: &TradeResult| t.direction.to_string()),
        col!("trade_type", |t: &TradeResult| t.trade_type.to_string()),
        col!("quality", |t: &TradeResult| t.quality.to_string()),
        col!("shares", |t: &TradeResult| t.shares),
        millis_column("entry_ts", trades.iter().map(|t| t.entry_ts.timestamp_millis()).collect())?,
        col!("entry_price", |t: &TradeResult| t.entry_price),
        millis_column("exit_ts", trades.iter().map(|t| t.exit_ts.timestamp_millis()).collect())?,
        col!("exit_price", |t: &TradeResult| t.exit_price),
        col!("stop", |t: &TradeResult| t.stop),
        col!("entry_commission", |t: &TradeResult| t.entry_commission),
        col!("entry_reg_fees", |t: &TradeResult| t.entry_reg_fees),
        col!("entry_slippage", |t: &TradeResult| t.entry_slippage),
        col!("entry_spread_cost", |t: &TradeResult| t.entry_spread_cost),
        col!("exit_commission", |t: &TradeResult| t.exit_commission),
        col!("exit_reg_fees", |t: &TradeResult| t.exit_reg_fees),
        col!("exit_slippage", |t: &TradeResult| t.exit_slippage),
        col!("exit_spread_cost", |t: &TradeResult| t.exit_spread_cost),
        col!("total_costs", |t: &TradeResult| t.total_costs),
        col!("pnl_gross", |t: &TradeResult| t.pnl_gross),
        col!("pnl_net", |t: &TradeResult| t.pnl_net),
        col!("r_multiple", |t: &TradeResult| t.r_multiple),
        col!("pnl_gross_r", |t: &TradeResult| t.pnl_gross_r),
        col!("pnl_r_account", |t: &TradeResult| t.pnl_r_account),
        col!("risk_tier", |t: &TradeResult| t.risk_tier as i64),
        col!("risk_pct", |t: &TradeResult| t.risk_pct),
        col!("outcome", |t: &TradeResult| serde_plain(&t.outcome)),
        col!("exit_reason", |t: &TradeResult| serde_plain(&t.exit_reason)),
    ])
    .context("assemble trades dataframe")?;

    write_parquet_atomic(df, path)
}

/// Serialize an enum to its wire name (no quotes).
fn serde_plain<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Numeric-field readback of the trades ledger, used to verify that the
/// persisted artifact reproduces the reported metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRow {
    pub playbook: String,
    pub entry_ts: DateTime<Utc>,
    pub pnl_gross: f64,
    pub pnl_net: f64,
    pub total_costs: f64,
    pub r_multiple: f64,
    pub pnl_gross_r: f64,
    pub pnl_r_account: f64,
}

pub fn read_trades_parquet(path: &Path) -> Result<Vec<TradeRow>> {
    let file = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let df = ParquetReader::new(file).finish().context("read trades parquet")?;

    let str_col = |name: &str| -> Result<Vec<String>> {
        Ok(df
            .column(name)?
            .str()?
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect())
    };
    let f64_col = |name: &str| -> Result<Vec<f64>> {
        Ok(df.column(name)?.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    };
    let millis = df
        .column("entry_ts")?
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        .datetime()?
        .into_iter()
        .map(|v| v.unwrap_or(0))
        .collect::<Vec<i64>>();

    let playbook = str_col("playbook")?;
    let pnl_gross = f64_col("pnl_gross")?;
    let pnl_net = f64_col("pnl_net")?;
    let total_costs = f64_col("total_costs")?;
    let r_multiple = f64_col("r_multiple")?;
    let pnl_gross_r = f64_col("pnl_gross_r")?;
    let pnl_r_account = f64_col("pnl_r_account")?;

    Ok((0..df.height())
        .map(|i| TradeRow {
            playbook: playbook[i].clone(),
            entry_ts: Utc.timestamp_millis_opt(millis[i]).single().unwrap_or_default(),
            pnl_gross: pnl_gross[i],
            pnl_net: pnl_net[i],
            total_costs: total_costs[i],
            r_multiple: r_multiple[i],
            pnl_gross_r: pnl_gross_r[i],
            pnl_r_account: pnl_r_account[i],
        })
        .collect())
}

/// Equity curve artifact.
pub fn write_equity_parquet(points: &[EquityPoint], path: &Path) -> Result<()> {
    let df = DataFrame::new(vec![
        millis_column(
            "timestamp",
            points.iter().map(|p| p.timestamp.timestamp_millis()).collect(),
        )?,
        Column::new("equity".into(), points.iter().map(|p| p.equity).collect::<Vec<f64>>()),
        Column::new(
            "cumulative_r".into(),
            points.iter().map(|p| p.cumulative_r).collect::<Vec<f64>>(),
        ),
        Column::new(
            "drawdown_r".into(),
            points.iter().map(|p| p.drawdown_r).collect::<Vec<f64>>(),
        ),
    ])
    .context("assemble equity dataframe")?;
    write_parquet_atomic(df, path)
}

/// Optional per-bar market-state stream.
pub fn write_market_state_parquet(rows: &[MarketStateRow], path: &Path) -> Result<()> {
    macro_rules! scol {
        ($name:expr, $f:expr) => {
            Column::new($name.into(), rows.iter().map($f).collect::<Vec<String>>())
        };
    }
    let df = DataFrame::new(vec![
        millis_column(
            "timestamp",
            rows.iter().map(|r| r.timestamp.timestamp_millis()).collect(),
        )?,
        scol!("symbol", |r: &MarketStateRow| r.symbol.clone()),
        scol!("session", |r: &MarketStateRow| r.session.clone()),
        scol!("daily_structure", |r: &MarketStateRow| r.daily_structure.clone()),
        scol!("h4_structure", |r: &MarketStateRow| r.h4_structure.clone()),
        scol!("h1_structure", |r: &MarketStateRow| r.h1_structure.clone()),
        scol!("bias", |r: &MarketStateRow| r.bias.clone()),
        scol!("day_type", |r: &MarketStateRow| r.day_type.clone()),
        Column::new("volatility".into(), rows.iter().map(|r| r.volatility).collect::<Vec<f64>>()),
    ])
    .context("assemble market state dataframe")?;
    write_parquet_atomic(df, path)
}

pub fn write_summary_json(metrics: &MetricsReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(metrics).context("serialize summary")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn write_debug_counts_json(debug: &DebugCounts, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(debug).context("serialize debug counts")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
