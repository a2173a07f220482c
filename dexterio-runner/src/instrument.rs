//! Funnel instrumentation counters, exported as `debug_counts.json`.

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Default, Serialize)]
pub struct DebugCounts {
    pub warmup_bars_fed: u64,
    pub bars_processed: u64,
    pub evaluations_total: u64,
    pub playbook_matches_total: u64,
    pub gate_rejections: BTreeMap<String, u64>,
    pub risk_rejections: BTreeMap<String, u64>,
    pub setups_emitted: u64,
    pub trades_opened: u64,
    pub trades_closed: u64,
    pub blocked_by_per_minute_cap: u64,
    pub day_type_distribution: BTreeMap<String, u64>,
    pub bypasses_applied: BTreeMap<String, u64>,
    pub market_state_cache_hits: u64,
    pub market_state_cache_misses: u64,
    pub component_failures: BTreeMap<String, u64>,
}

impl DebugCounts {
    pub fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
        *map.entry(key.to_string()).or_insert(0) += 1;
    }
}
