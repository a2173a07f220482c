//! End-to-end pipeline scenarios on engineered synthetic data.
//!
//! Each trading day is shaped the same way: a choppy open that leaves clear
//! swing pivots, a steady late-morning climb that breaks structure, and a
//! flat fade into the close. That guarantees BOS detections (and therefore
//! trades under a permissive catalog) without any market data on disk.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::fs;
use std::path::PathBuf;

use dexterio_core::domain::Bar;
use dexterio_runner::data::write_bars;
use dexterio_runner::runner::{run, RunStatus};
use dexterio_runner::RunConfig;

/// Permissive catalog: one DAYTRADE playbook gated only on a BOS.
const TEST_CATALOG: &str = r#"
[[playbook]]
name = "Any_BOS"
category = "DAYTRADE"
min_rr = 1.5
min_score = 0.0

[playbook.scoring_weights]
ict = 0.6
pattern = 0.1
context = 0.3
"#;

/// 5m-block price offsets for the choppy open. The shape leaves confirmed
/// pivot highs (blocks 3 and 7) and pivot lows (blocks 4 and 8) on the 5m
/// window before the displacement leg starts.
const CHOP_OFFSETS: [f64; 12] =
    [0.0, 0.3, -0.2, 0.5, -0.4, 0.2, -0.3, 0.4, -0.5, 0.1, -0.1, 0.0];

/// One ET trading day of 1m bars (09:30-15:59 ET == 13:30-19:59 UTC during
/// daylight saving). `base` drifts per day so consecutive days differ.
fn trading_day(symbol: &str, date: NaiveDate, base: f64) -> Vec<Bar> {
    let open_utc = Utc.from_utc_datetime(&date.and_hms_opt(13, 30, 0).unwrap());

    let mut bars = Vec::with_capacity(390);
    for i in 0..390_i64 {
        let ts = open_utc + Duration::minutes(i);
        let price = if i < 60 {
            base + CHOP_OFFSETS[(i / 5) as usize]
        } else if i < 150 {
            // displacement leg: a steady grind that breaks the chop pivots
            base + (i - 60) as f64 * 0.05
        } else {
            // afternoon fade back toward the middle of the day's range
            base + 90.0 * 0.05 - (i - 150) as f64 * 0.01
        };
        let open = price;
        let close = price + 0.02;
        let high = close + 0.15;
        let low = open - 0.15;
        bars.push(Bar::new(ts, symbol, open, high, low, close, 10_000.0 + (i % 7) as f64));
    }
    bars
}

fn gen_symbol(symbol: &str, first_day: NaiveDate, days: i64) -> Vec<Bar> {
    let mut bars = Vec::new();
    for d in 0..days {
        let date = first_day + Duration::days(d);
        bars.extend(trading_day(symbol, date, 450.0 + d as f64 * 0.5));
    }
    bars
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

/// Repo-shaped temp directory with SPY data and the test catalog.
fn fixture(first_day: NaiveDate, days: i64) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let data_dir = root.join("data/historical/1m");
    fs::create_dir_all(&data_dir).unwrap();
    write_bars(&data_dir.join("SPY.parquet"), &gen_symbol("SPY", first_day, days)).unwrap();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::write(root.join("config/playbooks.toml"), TEST_CATALOG).unwrap();

    Fixture { _dir: dir, root }
}

fn config_toml(start: &str, end: &str, warmup: i64, extra: &str) -> String {
    format!(
        r#"
[run]
run_name = "pipeline-test"
symbols = ["SPY"]
start_date = "{start}"
end_date = "{end}"
htf_warmup_days = {warmup}
trading_mode = "AGGRESSIVE"
initial_capital = 50000.0
{extra}
"#
    )
}

fn run_fixture(fixture: &Fixture, toml: &str) -> dexterio_runner::RunOutcome {
    let config = RunConfig::from_toml(toml).unwrap();
    run(&config, &fixture.root, None).unwrap()
}

#[test]
fn engineered_day_produces_trades_with_consistent_accounting() {
    // 10 days of history, score the last 3
    let fixture = fixture(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 10);
    let outcome = run_fixture(&fixture, &config_toml("2025-08-08", "2025-08-10", 7, ""));

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.debug.bars_processed > 0);
    assert!(!outcome.trades.is_empty(), "engineered BOS days should trade");

    for trade in &outcome.trades {
        // accounting invariants
        assert!(
            (trade.pnl_net - (trade.pnl_gross - trade.total_costs)).abs() < 1e-9,
            "net must be gross minus costs"
        );
        assert!(trade.total_costs >= 0.0);
        assert!(trade.pnl_net <= trade.pnl_gross);
        match trade.outcome {
            dexterio_core::domain::Outcome::Win => assert!(trade.pnl_net > 0.0),
            dexterio_core::domain::Outcome::Loss => assert!(trade.pnl_net < 0.0),
            dexterio_core::domain::Outcome::Breakeven => assert_eq!(trade.pnl_net, 0.0),
        }
        assert!(trade.shares > 0);
    }

    // every bar evaluated the whole catalog
    assert_eq!(outcome.debug.evaluations_total, outcome.debug.bars_processed);
}

#[test]
fn frictionless_run_has_net_equal_gross() {
    let fixture = fixture(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 10);
    let extra = r#"
[costs]
commission_model = "none"
enable_reg_fees = false
slippage_model = "none"
spread_model = "none"
"#;
    let toml = format!("{}\n{}", config_toml("2025-08-08", "2025-08-10", 7, ""), extra);
    let outcome = run_fixture(&fixture, &toml);

    assert!(!outcome.trades.is_empty());
    for trade in &outcome.trades {
        assert_eq!(trade.total_costs, 0.0);
        assert_eq!(trade.pnl_net, trade.pnl_gross);
    }
}

#[test]
fn identical_runs_are_deterministic() {
    let fixture = fixture(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 10);
    let toml = config_toml("2025-08-08", "2025-08-10", 7, "");

    let a = run_fixture(&fixture, &toml);
    let b = run_fixture(&fixture, &toml);

    let summary_a = serde_json::to_string(&a.metrics).unwrap();
    let summary_b = serde_json::to_string(&b.metrics).unwrap();
    assert_eq!(summary_a, summary_b);

    assert_eq!(a.trades.len(), b.trades.len());
    for (ta, tb) in a.trades.iter().zip(&b.trades) {
        assert_eq!(ta.entry_ts, tb.entry_ts);
        assert_eq!(ta.entry_price, tb.entry_price);
        assert_eq!(ta.pnl_net, tb.pnl_net);
        assert_eq!(ta.setup_id, tb.setup_id);
    }
}

#[test]
fn date_slicing_limits_entries_to_the_window() {
    let fixture = fixture(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 10);
    let outcome = run_fixture(&fixture, &config_toml("2025-08-09", "2025-08-09", 8, ""));

    // one scored day of one symbol
    assert_eq!(outcome.debug.bars_processed, 390);
    let day = NaiveDate::from_ymd_opt(2025, 8, 9).unwrap();
    for trade in &outcome.trades {
        assert_eq!(dexterio_core::market::et_date(trade.entry_ts), day);
    }
}

#[test]
fn daily_entry_cap_is_never_exceeded() {
    let fixture = fixture(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 12);
    let outcome = run_fixture(&fixture, &config_toml("2025-08-08", "2025-08-12", 7, ""));

    let mut per_day = std::collections::BTreeMap::new();
    for trade in &outcome.trades {
        *per_day.entry(dexterio_core::market::et_date(trade.entry_ts)).or_insert(0u32) += 1;
    }
    for (day, count) in per_day {
        assert!(count <= 5, "AGGRESSIVE cap is 5/day, saw {count} on {day}");
    }
}

#[test]
fn warmup_populates_daily_structure() {
    let fixture = fixture(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 40);
    let export = "export_market_state = true";

    // no warmup: the daily window is empty on day one
    let cold = run_fixture(&fixture, &config_toml("2025-09-09", "2025-09-09", 0, export));
    let first_cold = cold.market_state_stream.first().expect("stream row");
    assert_eq!(first_cold.daily_structure, "unknown");

    // 39 days of prefeed: >= 20 daily candles before the first scored bar
    let warm = run_fixture(&fixture, &config_toml("2025-09-09", "2025-09-09", 39, export));
    assert!(warm.debug.warmup_bars_fed > 0);
    let first_warm = warm.market_state_stream.first().expect("stream row");
    assert_ne!(first_warm.daily_structure, "unknown");
}

#[test]
fn missing_symbol_file_fails_before_any_bar() {
    let fixture = fixture(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 2);
    let toml = config_toml("2025-08-01", "2025-08-02", 0, "").replace("[\"SPY\"]", "[\"QQQ\"]");
    let config = RunConfig::from_toml(&toml).unwrap();
    let err = run(&config, &fixture.root, None).unwrap_err();
    assert_eq!(err.kind(), "data_file_not_found");
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn progress_callback_can_stop_between_bars() {
    let fixture = fixture(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 10);
    let toml = config_toml("2025-08-08", "2025-08-10", 7, "");
    let config = RunConfig::from_toml(&toml).unwrap();

    let mut calls = 0;
    let mut cb = |_p: f64| {
        calls += 1;
        calls <= 1
    };
    let outcome = run(&config, &fixture.root, Some(&mut cb)).unwrap();
    assert_eq!(outcome.status, RunStatus::Stopped);
    // stopped after the first chunk: strictly fewer bars than the full run
    assert!(outcome.debug.bars_processed < 3 * 390);
}

fn write_job_config(fixture: &Fixture, toml: &str) -> PathBuf {
    let path = fixture.root.join("run.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[test]
fn job_manager_runs_a_job_to_done_with_artifacts() {
    use dexterio_runner::{JobManager, JobStatus};

    let fixture = fixture(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 10);
    let toml = config_toml("2025-08-08", "2025-08-09", 7, "");
    let config_path = write_job_config(&fixture, &toml);

    let results_root = fixture.root.join("results");
    let manager = JobManager::new(&fixture.root, &results_root);
    let config = RunConfig::from_file(&config_path).unwrap();
    let job_id = manager.submit(config).unwrap();
    manager.wait(&job_id);

    let record = manager.status(&job_id).unwrap();
    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.progress, 1.0);
    assert!(record.error.is_none());
    assert!(record.metrics.is_some());

    for artifact in ["trades.parquet", "equity.parquet", "summary.json", "debug_counts.json"] {
        assert!(
            record.artifact_paths.contains_key(artifact),
            "missing artifact {artifact}"
        );
        let bytes = manager.download(&job_id, artifact).unwrap();
        assert!(!bytes.is_empty());
    }

    let log = manager.log(&job_id).unwrap();
    assert!(log.contains("run complete"));
}

#[test]
fn summary_metrics_match_the_trades_artifact() {
    use dexterio_runner::export::read_trades_parquet;
    use dexterio_runner::metrics::{expectancy, max_drawdown_r, profit_factor};
    use dexterio_runner::{JobManager, JobStatus};

    let fixture = fixture(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 10);
    let toml = config_toml("2025-08-08", "2025-08-10", 7, "");
    let config_path = write_job_config(&fixture, &toml);

    let manager = JobManager::new(&fixture.root, fixture.root.join("results"));
    let job_id = manager.submit(RunConfig::from_file(&config_path).unwrap()).unwrap();
    manager.wait(&job_id);

    let record = manager.status(&job_id).unwrap();
    assert_eq!(record.status, JobStatus::Done);
    let metrics = record.metrics.unwrap();

    let rows = read_trades_parquet(&record.artifact_paths["trades.parquet"]).unwrap();
    assert!(!rows.is_empty());
    let rs: Vec<f64> = rows.iter().map(|r| r.r_multiple).collect();
    assert_eq!(profit_factor(&rs), metrics.overall.net.profit_factor);
    assert_eq!(expectancy(&rs), metrics.overall.net.expectancy_r);
    assert_eq!(max_drawdown_r(&rs), metrics.overall.net.max_drawdown_r);
}
