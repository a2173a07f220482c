//! Single-run orchestration: the deterministic bar loop.
//!
//! Bars are processed in strict ascending timestamp order, ties broken by
//! symbol name. For each bar the full pipeline runs to completion before
//! the next bar is observed: aggregation, liquidity, exits for open
//! positions, pattern refresh, market state, playbook evaluation, setup
//! synthesis. Candidate setups from bars sharing a minute are then admitted
//! together, in priority order, against the per-minute caps.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use dexterio_core::domain::types::{TradeType, TradingMode};
use dexterio_core::domain::{Bar, EquityPoint, Setup, TradeResult};
use dexterio_core::exec::{ExecutionSimulator, SpreadModel};
use dexterio_core::market::state::{DayPatternLog, MarketStateEngine};
use dexterio_core::market::{et_date, session_at, LiquidityTracker};
use dexterio_core::patterns::{
    CandlestickDetection, CandlestickEngine, IctDetection, IctEngine, IctKind, PatternDetection,
};
use dexterio_core::playbook::{Evaluation, PlaybookEvaluator};
use dexterio_core::risk::RiskEngine;
use dexterio_core::setup_engine::SetupEngine;
use dexterio_core::timeframe::{Timeframe, TimeframeAggregator};

use crate::config::RunConfig;
use crate::data::load_bars;
use crate::error::RunError;
use crate::instrument::DebugCounts;
use crate::metrics::MetricsReport;

/// Whether the loop ran to the end or was stopped externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Stopped,
}

/// Per-bar market-state export row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStateRow {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub session: String,
    pub daily_structure: String,
    pub h4_structure: String,
    pub h1_structure: String,
    pub bias: String,
    pub day_type: String,
    pub volatility: f64,
}

/// Everything a finished (or stopped) run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub trades: Vec<TradeResult>,
    pub equity: Vec<EquityPoint>,
    pub metrics: MetricsReport,
    pub debug: DebugCounts,
    pub market_state_stream: Vec<MarketStateRow>,
}

/// Periodic control callback: progress in [0,1]; return `false` to stop
/// between bars.
pub type ProgressFn<'a> = dyn FnMut(f64) -> bool + 'a;

/// Wire name of a unit enum variant ("manipulation_reversal", "uptrend").
fn wire_name<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Per-symbol pipeline state the loop threads through the bars.
struct SymbolState {
    liquidity: LiquidityTracker,
    day_log: DayPatternLog,
    current_ict: Vec<IctDetection>,
    current_candles: Vec<CandlestickDetection>,
    last_sweep_ts: Option<DateTime<Utc>>,
    last_close: f64,
}

impl SymbolState {
    fn new(sweep_threshold: f64) -> Self {
        Self {
            liquidity: LiquidityTracker::new(sweep_threshold),
            day_log: DayPatternLog::default(),
            current_ict: Vec::new(),
            current_candles: Vec::new(),
            last_sweep_ts: None,
            last_close: 0.0,
        }
    }
}

/// Candidate admission order for one minute: DAILY before SCALP, then
/// quality, score, confluence count, and R:R, best first. Symbol name is
/// the final, stable tie-break.
fn candidate_order(a: &Setup, b: &Setup) -> std::cmp::Ordering {
    let type_rank = |t: TradeType| match t {
        TradeType::Daily => 0,
        TradeType::Scalp => 1,
    };
    type_rank(a.trade_type)
        .cmp(&type_rank(b.trade_type))
        .then_with(|| b.quality.cmp(&a.quality))
        .then_with(|| b.final_score.total_cmp(&a.final_score))
        .then_with(|| b.confluences_count.cmp(&a.confluences_count))
        .then_with(|| b.risk_reward.total_cmp(&a.risk_reward))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

/// Execute a full backtest. `progress` (when given) is invoked between
/// bars; returning `false` stops the run, preserving everything produced so
/// far with `RunStatus::Stopped`.
pub fn run(
    config: &RunConfig,
    repo_root: &Path,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<RunOutcome, RunError> {
    let catalog = config.load_playbooks(repo_root)?;
    let data_paths = config.resolve_data_paths(repo_root)?;

    // load and globally merge bars: (timestamp, symbol) ascending
    let mut all_bars: Vec<Bar> = Vec::new();
    for (symbol, path) in &data_paths {
        let bars = load_bars(path, symbol)?;
        info!(symbol, bars = bars.len(), path = %path.display(), "loaded 1m bars");
        all_bars.extend(bars);
    }
    all_bars.sort_by(|a, b| {
        a.timestamp.cmp(&b.timestamp).then_with(|| a.symbol.cmp(&b.symbol))
    });

    // warmup feeds HTF windows only; scored bars run the full pipeline
    let start = config.run.start_date;
    let end = config.run.end_date;
    let warmup_start = start - Duration::days(config.run.htf_warmup_days);
    let (warmup, scored): (Vec<&Bar>, Vec<&Bar>) = {
        let mut warmup = Vec::new();
        let mut scored = Vec::new();
        for bar in &all_bars {
            let day = et_date(bar.timestamp);
            if day < warmup_start || day > end {
                continue;
            }
            if day < start {
                warmup.push(bar);
            } else {
                scored.push(bar);
            }
        }
        (warmup, scored)
    };

    let mut debug_counts = DebugCounts::default();
    let mut aggregator = TimeframeAggregator::new(config.run.market_close_hour_utc);
    for bar in &warmup {
        aggregator.ingest(bar)?;
        debug_counts.warmup_bars_fed += 1;
    }
    info!(
        warmup_bars = debug_counts.warmup_bars_fed,
        scored_bars = scored.len(),
        "warmup complete, starting scored loop"
    );

    let mut ms_engine = MarketStateEngine::new();
    let mut ict_engine = IctEngine::new(config.sweep_threshold());
    let candle_engine = CandlestickEngine::new();
    let evaluator = PlaybookEvaluator::new(
        catalog,
        config.run.trading_mode,
        config.run.default_time_windows.clone(),
    );
    let mut setup_engine = SetupEngine::new(config.setup_engine_config());
    let mut risk = RiskEngine::new(config.risk_config());
    let base_r_unit = config.run.initial_capital * config.run.base_risk_pct;
    let mut sim = ExecutionSimulator::new(config.exec_config(), base_r_unit);

    let spread_bps = match config.costs.spread_model {
        SpreadModel::FixedBps => config.costs.spread_bps,
        SpreadModel::None => 0.0,
    };
    let per_minute_cap_global: u32 = match config.run.trading_mode {
        TradingMode::Safe => 1,
        TradingMode::Aggressive => 2,
    };

    let mut symbols: HashMap<String, SymbolState> = config
        .run
        .symbols
        .iter()
        .map(|s| (s.clone(), SymbolState::new(config.sweep_threshold())))
        .collect();

    let mut trades: Vec<TradeResult> = Vec::new();
    let mut equity: Vec<EquityPoint> = Vec::new();
    let mut market_state_stream: Vec<MarketStateRow> = Vec::new();

    let mut current_day: Option<NaiveDate> = None;
    let mut status = RunStatus::Completed;
    let total = scored.len().max(1);
    let mut bars_done: usize = 0;
    let mut next_progress_check: usize = 0;

    let mut i = 0;
    while i < scored.len() {
        if let Some(cb) = progress.as_mut() {
            if bars_done >= next_progress_check {
                next_progress_check = bars_done + 500;
                if !cb(bars_done as f64 / total as f64) {
                    status = RunStatus::Stopped;
                    break;
                }
            }
        }

        let minute_ts = scored[i].timestamp;
        let day = et_date(minute_ts);
        let session = session_at(minute_ts);
        if current_day != Some(day) {
            current_day = Some(day);
            risk.on_day_boundary(day);
            for state in symbols.values_mut() {
                state.day_log.roll_to(day);
            }
        }

        // phase 1: run each symbol's pipeline for this minute, collecting
        // candidate setups
        let mut candidates: Vec<(Setup, &Bar)> = Vec::new();
        while i < scored.len() && scored[i].timestamp == minute_ts {
            let bar = scored[i];
            i += 1;

            let closed_tfs = aggregator.ingest(bar)?;
            debug_counts.bars_processed += 1;
            bars_done += 1;

            let state = symbols.get_mut(&bar.symbol).ok_or_else(|| {
                RunError::Runtime(format!("bar for unconfigured symbol {}", bar.symbol))
            })?;
            state.last_close = bar.close;

            {
                let daily_window = aggregator.window(&bar.symbol, Timeframe::D1).to_vec();
                let m15_window = aggregator.window(&bar.symbol, Timeframe::M15).to_vec();
                state.liquidity.on_bar(bar, session, day, &daily_window, &m15_window);
            }

            // exits (and pending entry fills) for positions opened earlier
            for trade in sim.on_bar(bar, session) {
                risk.update_after_trade(&trade, bar.timestamp);
                debug_counts.trades_closed += 1;
                equity.push(EquityPoint {
                    timestamp: bar.timestamp,
                    equity: risk.account_balance,
                    cumulative_r: risk.run_total_r,
                    drawdown_r: risk.current_drawdown_r(),
                });
                trades.push(trade);
            }

            // pattern refresh whenever the 5m window gained a bar
            if closed_tfs.contains(&Timeframe::M5) {
                let m5 = aggregator.window(&bar.symbol, Timeframe::M5).to_vec();
                state.current_ict =
                    ict_engine.detect(&bar.symbol, &m5, state.liquidity.levels(), Timeframe::M5);
                for det in &state.current_ict {
                    match det.kind {
                        IctKind::Bos => state.day_log.record_bos(det.timestamp, det.direction),
                        IctKind::Sweep => {
                            state.day_log.record_sweep(det.timestamp, det.direction);
                            state.last_sweep_ts = Some(det.timestamp);
                        }
                        _ => {}
                    }
                }
                state.current_candles =
                    candle_engine.detect(&m5, Timeframe::M5, &state.liquidity, state.last_sweep_ts);
            }

            let market_state = ms_engine.market_state(
                &aggregator,
                bar,
                session,
                &state.day_log,
                state.liquidity.levels(),
            );
            DebugCounts::bump(&mut debug_counts.day_type_distribution, &wire_name(&market_state.day_type));

            if config.run.export_market_state {
                market_state_stream.push(MarketStateRow {
                    timestamp: bar.timestamp,
                    symbol: bar.symbol.clone(),
                    session: market_state.session.to_string(),
                    daily_structure: wire_name(&market_state.daily_structure),
                    h4_structure: wire_name(&market_state.h4_structure),
                    h1_structure: wire_name(&market_state.h1_structure),
                    bias: wire_name(&market_state.bias),
                    day_type: wire_name(&market_state.day_type),
                    volatility: market_state.volatility,
                });
            }

            // evaluate the whole catalog; every playbook yields a match or
            // one counted rejection
            let evaluations =
                evaluator.evaluate_all(&market_state, &state.current_ict, &state.current_candles);
            debug_counts.evaluations_total += evaluations.len() as u64;
            let mut matches = Vec::new();
            for evaluation in evaluations {
                match evaluation {
                    Evaluation::Match(m) => {
                        debug_counts.playbook_matches_total += 1;
                        for bypass in &m.bypasses {
                            DebugCounts::bump(&mut debug_counts.bypasses_applied, bypass);
                        }
                        matches.push(m);
                    }
                    Evaluation::Reject { reason, .. } => {
                        DebugCounts::bump(&mut debug_counts.gate_rejections, reason.as_str());
                    }
                }
            }

            if !matches.is_empty() {
                let ict_patterns: Vec<PatternDetection> =
                    state.current_ict.iter().cloned().map(PatternDetection::Ict).collect();
                let setup = setup_engine.build(
                    bar,
                    &market_state,
                    matches,
                    &ict_patterns,
                    &state.liquidity,
                    |symbol, direction| sim.has_position_in_direction(symbol, direction),
                );
                if let Some(setup) = setup {
                    debug_counts.setups_emitted += 1;
                    candidates.push((setup, bar));
                }
            }

            equity.push(EquityPoint {
                timestamp: bar.timestamp,
                equity: risk.account_balance,
                cumulative_r: risk.run_total_r,
                drawdown_r: risk.current_drawdown_r(),
            });
        }

        // phase 2: admit this minute's candidates best-first against the
        // per-minute caps
        if !candidates.is_empty() {
            candidates.sort_by(|(a, _), (b, _)| candidate_order(a, b));

            let mut opened_this_minute: u32 = 0;
            for (setup, bar) in candidates {
                if opened_this_minute >= per_minute_cap_global {
                    debug_counts.blocked_by_per_minute_cap += 1;
                    continue;
                }
                match risk.admit(
                    &setup,
                    session,
                    minute_ts,
                    day,
                    spread_bps,
                    sim.has_position(&setup.symbol),
                ) {
                    Ok(admission) => {
                        risk.record_entry(&setup, session, minute_ts, day);
                        sim.submit(setup, admission, bar);
                        debug_counts.trades_opened += 1;
                        opened_this_minute += 1;
                    }
                    Err(reason) => {
                        DebugCounts::bump(&mut debug_counts.risk_rejections, reason.as_str());
                    }
                }
            }
        }
    }

    // whatever is still open closes at the last seen price
    if let Some(last_ts) = scored.last().map(|b| b.timestamp) {
        let last_closes: BTreeMap<String, f64> =
            symbols.iter().map(|(s, st)| (s.clone(), st.last_close)).collect();
        for trade in sim.liquidate_all(last_ts, |symbol| {
            last_closes.get(symbol).copied().unwrap_or(0.0)
        }) {
            risk.update_after_trade(&trade, last_ts);
            debug_counts.trades_closed += 1;
            equity.push(EquityPoint {
                timestamp: last_ts,
                equity: risk.account_balance,
                cumulative_r: risk.run_total_r,
                drawdown_r: risk.current_drawdown_r(),
            });
            trades.push(trade);
        }
    }

    debug_counts.market_state_cache_hits = ms_engine.cache_hits;
    debug_counts.market_state_cache_misses = ms_engine.cache_misses;

    let metrics = MetricsReport::compute(&trades);
    info!(
        trades = trades.len(),
        total_r = metrics.total_r_account,
        status = ?status,
        "run finished"
    );

    Ok(RunOutcome { status, trades, equity, metrics, debug: debug_counts, market_state_stream })
}
