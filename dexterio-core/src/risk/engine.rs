//! Admission gatekeeping, position sizing, guardrails.
//!
//! Rejections are values from a closed taxonomy and are counted by the
//! instrumentation layer; they never abort a run.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, warn};

use crate::domain::setup::Setup;
use crate::domain::trade::{Outcome, TradeResult};
use crate::domain::types::{Session, TradeType, TradingMode};

use super::two_tier::{TwoTierRisk, TwoTierState};

/// Why a setup was refused admission. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskReject {
    SizeZero,
    ModeNotInAllowlist,
    KillSwitched,
    DailyCapReached,
    SessionCapReached,
    CircuitStopDay,
    CircuitStopRun,
    CooldownLossActive,
    ConcurrentPositionSameSymbol,
    SpreadTooWide,
}

impl RiskReject {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskReject::SizeZero => "size_zero",
            RiskReject::ModeNotInAllowlist => "mode_not_in_allowlist",
            RiskReject::KillSwitched => "kill_switched",
            RiskReject::DailyCapReached => "daily_cap_reached",
            RiskReject::SessionCapReached => "session_cap_reached",
            RiskReject::CircuitStopDay => "circuit_stop_day",
            RiskReject::CircuitStopRun => "circuit_stop_run",
            RiskReject::CooldownLossActive => "cooldown_loss_active",
            RiskReject::ConcurrentPositionSameSymbol => "concurrent_position_same_symbol",
            RiskReject::SpreadTooWide => "spread_too_wide",
        }
    }
}

/// Per-mode caps and guardrail thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub mode: TradingMode,
    pub initial_capital: f64,
    pub base_risk_pct: f64,
    pub reduced_risk_pct: f64,
    /// Daily loss circuit breaker, in account-R (negative).
    pub stop_day_r: f64,
    /// Run drawdown circuit breaker, in account-R (positive).
    pub stop_run_r: f64,
    /// Trading pause after three consecutive losses, minutes.
    pub consec_loss_cooldown_min: i64,
    /// Playbooks admitted in the current mode; empty means everything.
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    /// Reject entries when the configured spread exceeds this.
    pub max_spread_bps: f64,
    /// Anti-spam: minimum minutes between entries of the same
    /// (symbol, playbook).
    pub playbook_cooldown_min: i64,
    /// Anti-spam: entries per (symbol, playbook, session) per day.
    pub max_trades_per_session_playbook: u32,
}

impl RiskConfig {
    fn daily_cap_total(&self) -> u32 {
        match self.mode {
            TradingMode::Safe => 4,
            TradingMode::Aggressive => 5,
        }
    }

    /// SAFE caps each trade type at two per day.
    fn daily_cap_per_type(&self) -> Option<u32> {
        match self.mode {
            TradingMode::Safe => Some(2),
            TradingMode::Aggressive => None,
        }
    }
}

/// Granted admission: the sizing decision for one setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub shares: i64,
    pub risk_pct: f64,
    pub risk_tier: u8,
    pub risk_dollars: f64,
}

/// Rolling per-playbook performance for the kill-switch.
#[derive(Debug, Default)]
struct PlaybookLedger {
    recent_r: VecDeque<f64>,
    total_r: f64,
    trades: u32,
}

const KILLSWITCH_WINDOW: usize = 30;
const KILLSWITCH_MIN_PF: f64 = 0.85;
/// Immediate kill regardless of trade count.
const KILLSWITCH_HARD_STOP_R: f64 = -25.0;
const CONSEC_LOSS_LIMIT: u32 = 3;

/// Mutable risk state, exclusively owned by the simulation task.
#[derive(Debug)]
pub struct RiskEngine {
    config: RiskConfig,
    two_tier: TwoTierRisk,

    pub account_balance: f64,
    pub peak_balance: f64,
    pub run_total_r: f64,
    run_peak_r: f64,
    pub max_drawdown_r: f64,

    pub daily_pnl_r: f64,
    pub daily_pnl_dollars: f64,
    daily_trades_total: u32,
    daily_trades_by_type: BTreeMap<TradeType, u32>,

    consecutive_losses: u32,
    cooldown_until: Option<DateTime<Utc>>,
    day_frozen: bool,
    pub freeze_reason: Option<String>,
    run_stopped: bool,

    kill_switched: BTreeSet<String>,
    playbooks: HashMap<String, PlaybookLedger>,

    last_entry: HashMap<(String, String), DateTime<Utc>>,
    session_entries: HashMap<(String, String, Session, NaiveDate), u32>,

    current_day: Option<NaiveDate>,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        let two_tier = TwoTierRisk::new(config.base_risk_pct, config.reduced_risk_pct);
        let capital = config.initial_capital;
        Self {
            config,
            two_tier,
            account_balance: capital,
            peak_balance: capital,
            run_total_r: 0.0,
            run_peak_r: 0.0,
            max_drawdown_r: 0.0,
            daily_pnl_r: 0.0,
            daily_pnl_dollars: 0.0,
            daily_trades_total: 0,
            daily_trades_by_type: BTreeMap::new(),
            consecutive_losses: 0,
            cooldown_until: None,
            day_frozen: false,
            freeze_reason: None,
            run_stopped: false,
            kill_switched: BTreeSet::new(),
            playbooks: HashMap::new(),
            last_entry: HashMap::new(),
            session_entries: HashMap::new(),
            current_day: None,
        }
    }

    pub fn two_tier_state(&self) -> TwoTierState {
        self.two_tier.state()
    }

    pub fn current_risk_pct(&self) -> f64 {
        self.two_tier.current_risk_pct()
    }

    pub fn trading_allowed(&self) -> bool {
        !self.run_stopped && !self.day_frozen
    }

    /// Point-in-time drawdown from the run peak, in account-R.
    pub fn current_drawdown_r(&self) -> f64 {
        self.run_peak_r - self.run_total_r
    }

    pub fn kill_switched_playbooks(&self) -> &BTreeSet<String> {
        &self.kill_switched
    }

    /// First bar of a new ET calendar day: reset daily counters and thaw the
    /// day freeze unless a run-level breaker is active.
    pub fn on_day_boundary(&mut self, day: NaiveDate) {
        if self.current_day == Some(day) {
            return;
        }
        self.current_day = Some(day);
        self.daily_pnl_r = 0.0;
        self.daily_pnl_dollars = 0.0;
        self.daily_trades_total = 0;
        self.daily_trades_by_type.clear();
        self.consecutive_losses = 0;
        self.day_frozen = false;
        if !self.run_stopped {
            self.freeze_reason = None;
        }
        self.session_entries.retain(|(_, _, _, d), _| *d == day);
        self.two_tier.on_new_day();
        debug!(%day, "risk engine daily reset");
    }

    /// Gate a setup and size it. Exactly one rejection reason on refusal.
    pub fn admit(
        &self,
        setup: &Setup,
        session: Session,
        now: DateTime<Utc>,
        day: NaiveDate,
        spread_bps: f64,
        has_open_position_same_symbol: bool,
    ) -> Result<Admission, RiskReject> {
        if self.run_stopped {
            return Err(RiskReject::CircuitStopRun);
        }
        if self.day_frozen {
            return Err(RiskReject::CircuitStopDay);
        }
        if let Some(until) = self.cooldown_until {
            if now < until {
                return Err(RiskReject::CooldownLossActive);
            }
        }

        if self.daily_trades_total >= self.config.daily_cap_total() {
            return Err(RiskReject::DailyCapReached);
        }
        if let Some(cap) = self.config.daily_cap_per_type() {
            let used = self.daily_trades_by_type.get(&setup.trade_type).copied().unwrap_or(0);
            if used >= cap {
                return Err(RiskReject::SessionCapReached);
            }
        }

        // anti-spam: per (symbol, playbook) cooldown and per-session cap
        let key = (setup.symbol.clone(), setup.playbook_name.clone());
        if let Some(last) = self.last_entry.get(&key) {
            if now - *last < Duration::minutes(self.config.playbook_cooldown_min) {
                return Err(RiskReject::SessionCapReached);
            }
        }
        let session_key = (setup.symbol.clone(), setup.playbook_name.clone(), session, day);
        if self.session_entries.get(&session_key).copied().unwrap_or(0)
            >= self.config.max_trades_per_session_playbook
        {
            return Err(RiskReject::SessionCapReached);
        }

        if self.config.denylist.iter().any(|d| d == &setup.playbook_name) {
            return Err(RiskReject::ModeNotInAllowlist);
        }
        if !self.config.allowlist.is_empty()
            && !self.config.allowlist.iter().any(|a| a == &setup.playbook_name)
        {
            return Err(RiskReject::ModeNotInAllowlist);
        }
        if self.kill_switched.contains(&setup.playbook_name) {
            return Err(RiskReject::KillSwitched);
        }

        if has_open_position_same_symbol {
            return Err(RiskReject::ConcurrentPositionSameSymbol);
        }
        if spread_bps > self.config.max_spread_bps {
            return Err(RiskReject::SpreadTooWide);
        }

        let risk_pct = self.two_tier.current_risk_pct();
        let stop_distance = setup.stop_distance();
        let shares = if stop_distance > 0.0 {
            ((self.account_balance * risk_pct) / stop_distance).floor() as i64
        } else {
            0
        };
        if shares <= 0 {
            return Err(RiskReject::SizeZero);
        }

        Ok(Admission {
            shares,
            risk_pct,
            risk_tier: self.two_tier.current_tier(),
            risk_dollars: shares as f64 * stop_distance,
        })
    }

    /// Record an admitted entry for the cap and anti-spam counters.
    pub fn record_entry(&mut self, setup: &Setup, session: Session, now: DateTime<Utc>, day: NaiveDate) {
        self.daily_trades_total += 1;
        *self.daily_trades_by_type.entry(setup.trade_type).or_insert(0) += 1;
        self.last_entry.insert((setup.symbol.clone(), setup.playbook_name.clone()), now);
        *self
            .session_entries
            .entry((setup.symbol.clone(), setup.playbook_name.clone(), session, day))
            .or_insert(0) += 1;
    }

    /// The single total transition applied on every trade close.
    pub fn update_after_trade(&mut self, trade: &TradeResult, now: DateTime<Utc>) {
        self.account_balance += trade.pnl_net;
        if self.account_balance > self.peak_balance {
            self.peak_balance = self.account_balance;
        }

        self.run_total_r += trade.pnl_r_account;
        if self.run_total_r > self.run_peak_r {
            self.run_peak_r = self.run_total_r;
        }
        let drawdown = self.run_peak_r - self.run_total_r;
        if drawdown > self.max_drawdown_r {
            self.max_drawdown_r = drawdown;
        }

        self.daily_pnl_dollars += trade.pnl_net;
        self.daily_pnl_r += trade.pnl_r_account;

        match trade.outcome {
            Outcome::Loss => {
                self.consecutive_losses += 1;
                if self.consecutive_losses >= CONSEC_LOSS_LIMIT {
                    self.cooldown_until =
                        Some(now + Duration::minutes(self.config.consec_loss_cooldown_min));
                    warn!(
                        losses = self.consecutive_losses,
                        cooldown_min = self.config.consec_loss_cooldown_min,
                        "consecutive-loss cooldown engaged"
                    );
                }
            }
            Outcome::Win => self.consecutive_losses = 0,
            Outcome::Breakeven => {}
        }

        self.two_tier.on_trade_closed(trade.outcome);
        self.update_playbook_ledger(&trade.playbook_name, trade.r_multiple);

        if self.daily_pnl_r <= self.config.stop_day_r && !self.day_frozen {
            self.day_frozen = true;
            self.freeze_reason = Some(format!(
                "stop_day: daily_pnl_r {:.2} <= {:.2}",
                self.daily_pnl_r, self.config.stop_day_r
            ));
            self.two_tier.freeze_day();
            warn!(daily_pnl_r = self.daily_pnl_r, "daily circuit breaker tripped");
        }
        if self.run_peak_r - self.run_total_r >= self.config.stop_run_r && !self.run_stopped {
            self.run_stopped = true;
            self.freeze_reason = Some(format!(
                "stop_run: drawdown {:.2} >= {:.2}",
                self.run_peak_r - self.run_total_r,
                self.config.stop_run_r
            ));
            warn!(drawdown_r = self.run_peak_r - self.run_total_r, "run circuit breaker tripped");
        }
    }

    fn update_playbook_ledger(&mut self, playbook: &str, r_multiple: f64) {
        let ledger = self.playbooks.entry(playbook.to_string()).or_default();
        ledger.trades += 1;
        ledger.total_r += r_multiple;
        ledger.recent_r.push_back(r_multiple);
        if ledger.recent_r.len() > KILLSWITCH_WINDOW {
            ledger.recent_r.pop_front();
        }

        if self.kill_switched.contains(playbook) {
            return;
        }

        if ledger.total_r <= KILLSWITCH_HARD_STOP_R {
            self.kill_switched.insert(playbook.to_string());
            warn!(playbook, total_r = ledger.total_r, "kill-switch hard stop");
            return;
        }

        if ledger.trades as usize >= KILLSWITCH_WINDOW {
            let profits: f64 = ledger.recent_r.iter().filter(|r| **r > 0.0).sum();
            let losses: f64 = ledger.recent_r.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();
            let pf = if losses > 0.0 { profits / losses } else { f64::INFINITY };
            if pf < KILLSWITCH_MIN_PF {
                self.kill_switched.insert(playbook.to_string());
                warn!(playbook, pf, "kill-switch: rolling profit factor below threshold");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::setup::{PlaybookMatch, ScoreComponents, TriggerLevels};
    use crate::domain::types::{Bias, DayType, Direction, Grade, Structure};
    use crate::domain::ExitReason;
    use chrono::TimeZone;

    fn config(mode: TradingMode) -> RiskConfig {
        RiskConfig {
            mode,
            initial_capital: 50_000.0,
            base_risk_pct: 0.02,
            reduced_risk_pct: 0.01,
            stop_day_r: -4.0,
            stop_run_r: 20.0,
            consec_loss_cooldown_min: 60,
            allowlist: vec![],
            denylist: vec![],
            max_spread_bps: 10.0,
            playbook_cooldown_min: 15,
            max_trades_per_session_playbook: 10,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 13, 45, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    fn setup(playbook: &str, trade_type: TradeType, entry: f64, stop: f64) -> Setup {
        Setup {
            id: "s1".into(),
            timestamp: now(),
            symbol: "SPY".into(),
            direction: Direction::Long,
            quality: Grade::A,
            final_score: 0.8,
            trade_type,
            entry,
            stop,
            tp1: entry + 2.0 * (entry - stop),
            tp2: entry + 4.0 * (entry - stop),
            risk_reward: 2.0,
            market_bias: Bias::Bullish,
            session: Session::NyAm,
            day_type: DayType::Trend,
            daily_structure: Structure::Uptrend,
            confluences_count: 1,
            playbook_name: playbook.into(),
            playbook_matches: vec![PlaybookMatch {
                playbook_name: playbook.into(),
                category: trade_type,
                symbol: "SPY".into(),
                timestamp: now(),
                direction: Direction::Long,
                score: 0.8,
                grade: Grade::A,
                components: ScoreComponents::default(),
                min_rr: 2.0,
                trigger: Some(TriggerLevels { invalidation: stop, anchor: None }),
                bypasses: vec![],
            }],
            ict_patterns: vec![],
            notes: String::new(),
        }
    }

    fn trade(playbook: &str, pnl_net: f64, r_account: f64, r_multiple: f64) -> TradeResult {
        TradeResult {
            setup_id: "s1".into(),
            playbook_name: playbook.into(),
            symbol: "SPY".into(),
            direction: Direction::Long,
            trade_type: TradeType::Daily,
            quality: Grade::A,
            shares: 100,
            entry_ts: now(),
            entry_price: 100.0,
            exit_ts: now(),
            exit_price: 100.0 + pnl_net / 100.0,
            stop: 99.0,
            entry_commission: 0.0,
            entry_reg_fees: 0.0,
            entry_slippage: 0.0,
            entry_spread_cost: 0.0,
            exit_commission: 0.0,
            exit_reg_fees: 0.0,
            exit_slippage: 0.0,
            exit_spread_cost: 0.0,
            total_costs: 0.0,
            pnl_gross: pnl_net,
            pnl_net,
            r_multiple,
            pnl_gross_r: r_multiple,
            pnl_r_account: r_account,
            risk_tier: 2,
            risk_pct: 0.02,
            outcome: Outcome::from_net_pnl(pnl_net),
            exit_reason: ExitReason::Tp1,
        }
    }

    fn admit(engine: &RiskEngine, s: &Setup) -> Result<Admission, RiskReject> {
        engine.admit(s, Session::NyAm, now(), day(), 2.0, false)
    }

    #[test]
    fn sizing_is_floor_of_risk_over_stop_distance() {
        let mut engine = RiskEngine::new(config(TradingMode::Aggressive));
        engine.on_day_boundary(day());
        // 50_000 * 2% = 1000 risk; stop distance 1.5 -> 666 shares
        let s = setup("PB", TradeType::Daily, 100.0, 98.5);
        let admission = admit(&engine, &s).unwrap();
        assert_eq!(admission.shares, 666);
        assert_eq!(admission.risk_tier, 2);
        assert!((admission.risk_dollars - 666.0 * 1.5).abs() < 1e-9);
    }

    #[test]
    fn huge_stop_distance_sizes_to_zero() {
        let mut engine = RiskEngine::new(config(TradingMode::Aggressive));
        engine.on_day_boundary(day());
        let s = setup("PB", TradeType::Daily, 3000.0, 100.0);
        assert_eq!(admit(&engine, &s), Err(RiskReject::SizeZero));
    }

    #[test]
    fn aggressive_daily_cap_is_five() {
        let mut engine = RiskEngine::new(config(TradingMode::Aggressive));
        engine.on_day_boundary(day());
        for i in 0..5 {
            let s = setup(&format!("PB{i}"), TradeType::Daily, 100.0, 99.0);
            admit(&engine, &s).unwrap();
            engine.record_entry(&s, Session::NyAm, now(), day());
        }
        let s = setup("PB9", TradeType::Daily, 100.0, 99.0);
        assert_eq!(admit(&engine, &s), Err(RiskReject::DailyCapReached));
    }

    #[test]
    fn safe_mode_caps_each_type_at_two() {
        let mut engine = RiskEngine::new(config(TradingMode::Safe));
        engine.on_day_boundary(day());
        for i in 0..2 {
            let s = setup(&format!("D{i}"), TradeType::Daily, 100.0, 99.0);
            admit(&engine, &s).unwrap();
            engine.record_entry(&s, Session::NyAm, now(), day());
        }
        let s = setup("D9", TradeType::Daily, 100.0, 99.0);
        assert_eq!(admit(&engine, &s), Err(RiskReject::SessionCapReached));
        // scalps still have room
        let s = setup("S0", TradeType::Scalp, 100.0, 99.0);
        assert!(admit(&engine, &s).is_ok());
    }

    #[test]
    fn denylist_and_allowlist_reject() {
        let mut cfg = config(TradingMode::Aggressive);
        cfg.allowlist = vec!["Good".into()];
        cfg.denylist = vec!["Bad".into()];
        let mut engine = RiskEngine::new(cfg);
        engine.on_day_boundary(day());

        assert_eq!(
            admit(&engine, &setup("Bad", TradeType::Daily, 100.0, 99.0)),
            Err(RiskReject::ModeNotInAllowlist)
        );
        assert_eq!(
            admit(&engine, &setup("Other", TradeType::Daily, 100.0, 99.0)),
            Err(RiskReject::ModeNotInAllowlist)
        );
        assert!(admit(&engine, &setup("Good", TradeType::Daily, 100.0, 99.0)).is_ok());
    }

    #[test]
    fn stop_day_freezes_until_next_day() {
        let mut engine = RiskEngine::new(config(TradingMode::Aggressive));
        engine.on_day_boundary(day());
        engine.update_after_trade(&trade("PB", -4000.0, -4.0, -1.0), now());
        assert!(!engine.trading_allowed());
        assert_eq!(
            admit(&engine, &setup("PB2", TradeType::Daily, 100.0, 99.0)),
            Err(RiskReject::CircuitStopDay)
        );

        engine.on_day_boundary(day().succ_opt().unwrap());
        assert!(engine.trading_allowed());
        assert!(admit(&engine, &setup("PB2", TradeType::Daily, 100.0, 99.0)).is_ok());
    }

    #[test]
    fn stop_run_freezes_for_good() {
        let mut engine = RiskEngine::new(config(TradingMode::Aggressive));
        engine.on_day_boundary(day());
        // climb to +21R, then give 20R back within the same day in chunks
        engine.update_after_trade(&trade("PB", 21_000.0, 21.0, 2.0), now());
        for _ in 0..5 {
            engine.update_after_trade(&trade("PB", -4000.0, -4.0, -1.0), now());
        }
        assert!(!engine.trading_allowed());
        assert_eq!(
            admit(&engine, &setup("PB2", TradeType::Daily, 100.0, 99.0)),
            Err(RiskReject::CircuitStopRun)
        );
        // the run breaker survives the daily reset
        engine.on_day_boundary(day().succ_opt().unwrap());
        assert_eq!(
            admit(&engine, &setup("PB2", TradeType::Daily, 100.0, 99.0)),
            Err(RiskReject::CircuitStopRun)
        );
    }

    #[test]
    fn three_consecutive_losses_trigger_cooldown() {
        let mut cfg = config(TradingMode::Aggressive);
        cfg.stop_day_r = -100.0; // keep the day breaker out of the way
        let mut engine = RiskEngine::new(cfg);
        engine.on_day_boundary(day());
        for _ in 0..3 {
            engine.update_after_trade(&trade("PB", -100.0, -0.1, -1.0), now());
        }
        assert_eq!(
            admit(&engine, &setup("PB2", TradeType::Daily, 100.0, 99.0)),
            Err(RiskReject::CooldownLossActive)
        );
        // after the timer expires admission resumes
        let later = now() + Duration::minutes(61);
        assert!(engine.admit(&setup("PB2", TradeType::Daily, 100.0, 99.0), Session::NyAm, later, day(), 2.0, false).is_ok());
    }

    #[test]
    fn playbook_cooldown_maps_to_session_cap() {
        let mut engine = RiskEngine::new(config(TradingMode::Aggressive));
        engine.on_day_boundary(day());
        let s = setup("PB", TradeType::Daily, 100.0, 99.0);
        admit(&engine, &s).unwrap();
        engine.record_entry(&s, Session::NyAm, now(), day());

        // same playbook five minutes later: still cooling down
        let soon = now() + Duration::minutes(5);
        assert_eq!(
            engine.admit(&s, Session::NyAm, soon, day(), 2.0, false),
            Err(RiskReject::SessionCapReached)
        );
        // a different playbook is unaffected
        let other = setup("PB2", TradeType::Daily, 100.0, 99.0);
        assert!(engine.admit(&other, Session::NyAm, soon, day(), 2.0, false).is_ok());
    }

    #[test]
    fn concurrent_position_and_wide_spread_reject() {
        let mut engine = RiskEngine::new(config(TradingMode::Aggressive));
        engine.on_day_boundary(day());
        let s = setup("PB", TradeType::Daily, 100.0, 99.0);
        assert_eq!(
            engine.admit(&s, Session::NyAm, now(), day(), 2.0, true),
            Err(RiskReject::ConcurrentPositionSameSymbol)
        );
        assert_eq!(
            engine.admit(&s, Session::NyAm, now(), day(), 50.0, false),
            Err(RiskReject::SpreadTooWide)
        );
    }

    #[test]
    fn kill_switch_on_rolling_profit_factor() {
        let mut cfg = config(TradingMode::Aggressive);
        cfg.stop_day_r = -1000.0;
        cfg.stop_run_r = 10_000.0;
        let mut engine = RiskEngine::new(cfg);
        engine.on_day_boundary(day());
        // 30 trades, PF well below 0.85: 10 wins of +1R, 20 losses of -1R
        for i in 0..30 {
            let (pnl, r) = if i % 3 == 0 { (100.0, 1.0) } else { (-100.0, -1.0) };
            engine.update_after_trade(&trade("Weak", pnl, r * 0.01, r), now());
        }
        assert!(engine.kill_switched_playbooks().contains("Weak"));
        assert_eq!(
            admit(&engine, &setup("Weak", TradeType::Daily, 100.0, 99.0)),
            Err(RiskReject::KillSwitched)
        );
    }

    #[test]
    fn hard_stop_kills_immediately() {
        let mut cfg = config(TradingMode::Aggressive);
        cfg.stop_day_r = -1000.0;
        cfg.stop_run_r = 10_000.0;
        let mut engine = RiskEngine::new(cfg);
        engine.on_day_boundary(day());
        for _ in 0..13 {
            engine.update_after_trade(&trade("Toxic", -200.0, -0.02, -2.0), now());
        }
        assert!(engine.kill_switched_playbooks().contains("Toxic"));
    }

    #[test]
    fn reduced_risk_after_loss_affects_sizing() {
        let mut engine = RiskEngine::new(config(TradingMode::Aggressive));
        engine.on_day_boundary(day());
        engine.update_after_trade(&trade("PB", -500.0, -0.5, -0.5), now());
        let s = setup("PB2", TradeType::Daily, 100.0, 99.0);
        let admission = admit(&engine, &s).unwrap();
        // balance 49_500 * 1% / 1.0 = 495 shares at tier 1
        assert_eq!(admission.shares, 495);
        assert_eq!(admission.risk_tier, 1);
    }
}
