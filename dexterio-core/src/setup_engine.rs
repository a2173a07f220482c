//! Setup synthesis: condense per-bar playbook matches into one `Setup`.

use crate::domain::setup::{PlaybookMatch, Setup};
use crate::domain::types::{Direction, TradeType};
use crate::domain::Bar;
use crate::market::liquidity::LiquidityTracker;
use crate::market::state::MarketState;
use crate::patterns::PatternDetection;

/// Entry anchoring policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryAnchor {
    /// Enter at the signal bar's close.
    #[default]
    BarClose,
    /// Prefer the triggering pattern's anchor price (FVG midpoint) when the
    /// pattern provides one.
    PatternAnchor,
}

#[derive(Debug, Clone, Copy)]
pub struct SetupEngineConfig {
    pub anchor: EntryAnchor,
    /// Stop padding beyond the invalidation price, in price units.
    pub stop_buffer: f64,
    /// Fallback minimum R:R when the matched playbook does not set one.
    pub default_min_rr_scalp: f64,
    pub default_min_rr_daily: f64,
}

impl Default for SetupEngineConfig {
    fn default() -> Self {
        Self {
            anchor: EntryAnchor::BarClose,
            stop_buffer: 0.02,
            default_min_rr_scalp: 1.5,
            default_min_rr_daily: 2.0,
        }
    }
}

/// Builds at most one setup per symbol per bar from the match list.
#[derive(Debug)]
pub struct SetupEngine {
    config: SetupEngineConfig,
    counter: u64,
}

impl SetupEngine {
    pub fn new(config: SetupEngineConfig) -> Self {
        Self { config, counter: 0 }
    }

    /// Pick the best match and construct the setup. Returns `None` when no
    /// match survives, the stop distance degenerates, or a position is
    /// already open in the same (symbol, direction).
    pub fn build(
        &mut self,
        bar: &Bar,
        state: &MarketState,
        mut matches: Vec<PlaybookMatch>,
        ict_patterns: &[PatternDetection],
        liquidity: &LiquidityTracker,
        has_open_position: impl Fn(&str, Direction) -> bool,
    ) -> Option<Setup> {
        if matches.is_empty() {
            return None;
        }

        // grade, then score; ties alphabetical, then SCALP before DAYTRADE
        matches.sort_by(|a, b| {
            b.grade
                .cmp(&a.grade)
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.playbook_name.cmp(&b.playbook_name))
                .then_with(|| {
                    let rank = |t: TradeType| match t {
                        TradeType::Scalp => 0,
                        TradeType::Daily => 1,
                    };
                    rank(a.category).cmp(&rank(b.category))
                })
        });
        let best = matches.first()?.clone();
        let direction = best.direction;

        if has_open_position(&bar.symbol, direction) {
            return None;
        }

        let entry = match (self.config.anchor, best.trigger.and_then(|t| t.anchor)) {
            (EntryAnchor::PatternAnchor, Some(anchor)) => anchor,
            _ => bar.close,
        };

        // stop at the pattern invalidation when an ICT detection backs the
        // match, else one ATR of the 5m window away
        let stop = match best.trigger {
            Some(t) => match direction {
                Direction::Long => t.invalidation - self.config.stop_buffer,
                Direction::Short => t.invalidation + self.config.stop_buffer,
            },
            None => {
                if state.volatility <= 0.0 {
                    return None;
                }
                entry - direction.sign() * (state.volatility + self.config.stop_buffer)
            }
        };
        let risk = (entry - stop).abs();
        if risk <= 0.0
            || (direction == Direction::Long && stop >= entry)
            || (direction == Direction::Short && stop <= entry)
        {
            return None;
        }

        let min_rr = if best.min_rr > 0.0 {
            best.min_rr
        } else {
            match best.category {
                TradeType::Scalp => self.config.default_min_rr_scalp,
                TradeType::Daily => self.config.default_min_rr_daily,
            }
        };

        // tp1: nearest opposite liquidity level that clears min R:R, else a
        // synthetic target at exactly min R:R
        let synthetic_tp1 = entry + direction.sign() * min_rr * risk;
        let tp1 = liquidity
            .nearest_opposite(entry, direction)
            .map(|l| l.price)
            .filter(|&p| (p - entry).abs() >= min_rr * risk)
            .unwrap_or(synthetic_tp1);
        let tp2 = entry + direction.sign() * ((tp1 - entry).abs() * 2.0);

        self.counter += 1;
        let id = format!("{}-{}-{:04}", bar.symbol, bar.timestamp.format("%Y%m%d%H%M"), self.counter);

        Some(Setup {
            id,
            timestamp: bar.timestamp,
            symbol: bar.symbol.clone(),
            direction,
            quality: best.grade,
            final_score: best.score,
            trade_type: best.category,
            entry,
            stop,
            tp1,
            tp2,
            risk_reward: (tp1 - entry).abs() / risk,
            market_bias: state.bias,
            session: state.session,
            day_type: state.day_type,
            daily_structure: state.daily_structure,
            confluences_count: matches.len(),
            playbook_name: best.playbook_name.clone(),
            playbook_matches: matches,
            ict_patterns: ict_patterns.to_vec(),
            notes: String::new(),
        })
    }
}
