//! TOML run configuration and playbook catalog loading.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dexterio_core::domain::types::{TradeType, TradingMode};
use dexterio_core::exec::{CostConfig, ExecConfig, FillPolicy, IntrabarPolicy};
use dexterio_core::playbook::{parse_catalog, Playbook, TimeWindow};
use dexterio_core::risk::RiskConfig;
use dexterio_core::setup_engine::{EntryAnchor, SetupEngineConfig};

use crate::error::{ConfigErrorKind, DataErrorKind, RunError};

fn default_warmup_days() -> i64 {
    40
}
fn default_capital() -> f64 {
    50_000.0
}
fn default_base_risk() -> f64 {
    0.02
}
fn default_reduced_risk() -> f64 {
    0.01
}
fn default_stop_day_r() -> f64 {
    -4.0
}
fn default_stop_run_r() -> f64 {
    20.0
}
fn default_cooldown_min() -> i64 {
    60
}
fn default_trade_types() -> Vec<TradeType> {
    vec![TradeType::Daily, TradeType::Scalp]
}
fn default_market_close_hour() -> u32 {
    19
}
fn default_sweep_threshold_ticks() -> u32 {
    2
}
fn default_max_spread_bps() -> f64 {
    10.0
}
fn default_playbook_cooldown() -> i64 {
    15
}
fn default_session_playbook_cap() -> u32 {
    1
}
fn default_timeout_minutes() -> u64 {
    30
}
fn default_playbooks_path() -> PathBuf {
    PathBuf::from("config/playbooks.toml")
}

/// `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    pub run_name: String,
    pub symbols: Vec<String>,
    /// Directory holding `<SYMBOL>.parquet` 1m files; defaults to
    /// `<repo>/data/historical/1m`.
    #[serde(default)]
    pub data_root: Option<PathBuf>,
    /// Per-symbol overrides of the discovery above.
    #[serde(default)]
    pub data_paths: BTreeMap<String, PathBuf>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_warmup_days")]
    pub htf_warmup_days: i64,
    pub trading_mode: TradingMode,
    #[serde(default = "default_trade_types")]
    pub trade_types: Vec<TradeType>,
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_base_risk")]
    pub base_risk_pct: f64,
    #[serde(default = "default_reduced_risk")]
    pub reduced_risk_pct: f64,
    #[serde(default = "default_stop_day_r")]
    pub stop_day_r: f64,
    #[serde(default = "default_stop_run_r")]
    pub stop_run_r: f64,
    #[serde(default = "default_cooldown_min")]
    pub consec_loss_cooldown_min: i64,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub export_market_state: bool,
    #[serde(default = "default_playbooks_path")]
    pub playbooks: PathBuf,
    /// Global ET windows applied to playbooks that declare none.
    #[serde(default)]
    pub default_time_windows: Vec<TimeWindow>,
    #[serde(default = "default_market_close_hour")]
    pub market_close_hour_utc: u32,
    #[serde(default = "default_sweep_threshold_ticks")]
    pub sweep_threshold_ticks: u32,
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: f64,
    #[serde(default = "default_playbook_cooldown")]
    pub playbook_cooldown_min: i64,
    #[serde(default = "default_session_playbook_cap")]
    pub max_trades_per_session_playbook: u32,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
}

/// `[execution]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default)]
    pub fill_policy: FillPolicy,
    #[serde(default)]
    pub intrabar_policy: IntrabarPolicy,
    #[serde(default = "default_scalp_duration")]
    pub scalp_max_duration_min: i64,
    #[serde(default = "default_tp1_fraction")]
    pub tp1_exit_fraction: f64,
    #[serde(default)]
    pub entry_anchor: EntryAnchor,
    #[serde(default = "default_stop_buffer_ticks")]
    pub stop_buffer_ticks: u32,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            fill_policy: FillPolicy::default(),
            intrabar_policy: IntrabarPolicy::default(),
            scalp_max_duration_min: default_scalp_duration(),
            tp1_exit_fraction: default_tp1_fraction(),
            entry_anchor: EntryAnchor::default(),
            stop_buffer_ticks: default_stop_buffer_ticks(),
        }
    }
}

fn default_scalp_duration() -> i64 {
    30
}
fn default_tp1_fraction() -> f64 {
    0.5
}
fn default_stop_buffer_ticks() -> u32 {
    2
}

/// Full run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub run: RunSection,
    #[serde(default)]
    pub costs: CostConfig,
    #[serde(default)]
    pub execution: ExecutionSection,
}

impl RunConfig {
    pub fn from_toml(text: &str) -> Result<Self, RunError> {
        let config: RunConfig = toml::from_str(text)
            .map_err(|e| RunError::config(ConfigErrorKind::InvalidConfig, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, RunError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RunError::config(
                ConfigErrorKind::InvalidConfig,
                format!("cannot read {}: {e}", path.display()),
            )
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), RunError> {
        let r = &self.run;
        let invalid =
            |message: String| RunError::config(ConfigErrorKind::InvalidConfig, message);

        if r.symbols.is_empty() {
            return Err(invalid("symbols must be non-empty".into()));
        }
        if r.end_date < r.start_date {
            return Err(invalid(format!(
                "end_date {} precedes start_date {}",
                r.end_date, r.start_date
            )));
        }
        if r.initial_capital <= 0.0 {
            return Err(invalid("initial_capital must be positive".into()));
        }
        for (name, pct) in [("base_risk_pct", r.base_risk_pct), ("reduced_risk_pct", r.reduced_risk_pct)] {
            if !(0.0..1.0).contains(&pct) || pct == 0.0 {
                return Err(invalid(format!("{name} must be in (0, 1)")));
            }
        }
        if r.reduced_risk_pct > r.base_risk_pct {
            return Err(invalid("reduced_risk_pct exceeds base_risk_pct".into()));
        }
        if r.htf_warmup_days < 0 {
            return Err(invalid("htf_warmup_days must be non-negative".into()));
        }
        if r.stop_day_r >= 0.0 {
            return Err(invalid("stop_day_r must be negative".into()));
        }
        if r.stop_run_r <= 0.0 {
            return Err(invalid("stop_run_r must be positive".into()));
        }
        if r.trade_types.is_empty() {
            return Err(invalid("trade_types must be non-empty".into()));
        }
        if !(0.0..=1.0).contains(&self.execution.tp1_exit_fraction) {
            return Err(invalid("tp1_exit_fraction must be in [0, 1]".into()));
        }
        Ok(())
    }

    /// Load and validate the playbook catalog, filtered to the configured
    /// trade types.
    pub fn load_playbooks(&self, repo_root: &Path) -> Result<Vec<Playbook>, RunError> {
        let path = if self.run.playbooks.is_absolute() {
            self.run.playbooks.clone()
        } else {
            repo_root.join(&self.run.playbooks)
        };
        let text = std::fs::read_to_string(&path).map_err(|e| {
            RunError::config(
                ConfigErrorKind::PlaybookConfigInvalid,
                format!("cannot read {}: {e}", path.display()),
            )
        })?;
        let catalog = parse_catalog(&text)
            .map_err(|e| RunError::config(ConfigErrorKind::PlaybookConfigInvalid, e))?;
        Ok(catalog
            .into_iter()
            .filter(|pb| self.run.trade_types.contains(&pb.category))
            .collect())
    }

    /// Resolve the parquet path for each configured symbol.
    pub fn resolve_data_paths(&self, repo_root: &Path) -> Result<BTreeMap<String, PathBuf>, RunError> {
        let data_dir = self
            .run
            .data_root
            .clone()
            .unwrap_or_else(|| crate::paths::historical_data_dir(repo_root, "1m"));

        let mut out = BTreeMap::new();
        for symbol in &self.run.symbols {
            if let Some(explicit) = self.run.data_paths.get(symbol) {
                if !explicit.exists() {
                    return Err(RunError::data(
                        DataErrorKind::DataFileNotFound,
                        format!("{}: {}", symbol, explicit.display()),
                    ));
                }
                out.insert(symbol.clone(), explicit.clone());
                continue;
            }
            match crate::paths::discover_symbol_parquet(&data_dir, symbol) {
                Some(path) => {
                    out.insert(symbol.clone(), path);
                }
                None => {
                    return Err(RunError::data(
                        DataErrorKind::DataFileNotFound,
                        format!("{} under {}", symbol, data_dir.display()),
                    ));
                }
            }
        }
        Ok(out)
    }

    pub fn risk_config(&self) -> RiskConfig {
        let r = &self.run;
        RiskConfig {
            mode: r.trading_mode,
            initial_capital: r.initial_capital,
            base_risk_pct: r.base_risk_pct,
            reduced_risk_pct: r.reduced_risk_pct,
            stop_day_r: r.stop_day_r,
            stop_run_r: r.stop_run_r,
            consec_loss_cooldown_min: r.consec_loss_cooldown_min,
            allowlist: r.allowlist.clone(),
            denylist: r.denylist.clone(),
            max_spread_bps: r.max_spread_bps,
            playbook_cooldown_min: r.playbook_cooldown_min,
            max_trades_per_session_playbook: r.max_trades_per_session_playbook,
        }
    }

    pub fn exec_config(&self) -> ExecConfig {
        ExecConfig {
            fill_policy: self.execution.fill_policy,
            intrabar_policy: self.execution.intrabar_policy,
            scalp_max_duration_min: self.execution.scalp_max_duration_min,
            tp1_exit_fraction: self.execution.tp1_exit_fraction,
            cost: self.costs,
        }
    }

    pub fn setup_engine_config(&self) -> SetupEngineConfig {
        SetupEngineConfig {
            anchor: self.execution.entry_anchor,
            stop_buffer: self.execution.stop_buffer_ticks as f64 * self.costs.tick_size,
            ..SetupEngineConfig::default()
        }
    }

    /// Sweep pierce distance in price units.
    pub fn sweep_threshold(&self) -> f64 {
        self.run.sweep_threshold_ticks as f64 * self.costs.tick_size
    }

    /// Deterministic digest over the serialized config, used for job ids.
    pub fn digest(&self) -> String {
        let json = serde_json::to_string(self).expect("config serializes");
        blake3::hash(json.as_bytes()).to_hex()[..12].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const MINIMAL_TOML: &str = r#"
[run]
run_name = "smoke"
symbols = ["SPY"]
start_date = "2025-08-01"
end_date = "2025-08-01"
trading_mode = "AGGRESSIVE"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = RunConfig::from_toml(MINIMAL_TOML).unwrap();
        assert_eq!(config.run.htf_warmup_days, 40);
        assert_eq!(config.run.initial_capital, 50_000.0);
        assert_eq!(config.run.base_risk_pct, 0.02);
        assert_eq!(config.run.trade_types, vec![TradeType::Daily, TradeType::Scalp]);
        assert_eq!(config.run.market_close_hour_utc, 19);
        assert_eq!(config.execution.scalp_max_duration_min, 30);
        assert_eq!(config.costs.spread_bps, 2.0);
    }

    #[test]
    fn inverted_dates_are_invalid() {
        let bad = MINIMAL_TOML.replace("end_date = \"2025-08-01\"", "end_date = \"2025-07-01\"");
        let err = RunConfig::from_toml(&bad).unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn unknown_mode_fails_parse() {
        let bad = MINIMAL_TOML.replace("AGGRESSIVE", "YOLO");
        assert!(RunConfig::from_toml(&bad).is_err());
    }

    #[test]
    fn zero_risk_is_invalid() {
        let bad = format!("{MINIMAL_TOML}base_risk_pct = 0.0\n");
        assert!(RunConfig::from_toml(&bad).is_err());
    }

    #[test]
    fn digest_is_stable_and_sensitive() {
        let a = RunConfig::from_toml(MINIMAL_TOML).unwrap();
        let b = RunConfig::from_toml(MINIMAL_TOML).unwrap();
        assert_eq!(a.digest(), b.digest());

        let c = RunConfig::from_toml(&MINIMAL_TOML.replace("smoke", "other")).unwrap();
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn missing_data_file_is_data_error() {
        let config = RunConfig::from_toml(MINIMAL_TOML).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = config.resolve_data_paths(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "data_file_not_found");
        assert_eq!(err.exit_code(), 3);
    }
}
