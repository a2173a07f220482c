//! Repo-root resolution and well-known paths.
//!
//! Resolution order:
//! 1. `DEXTERIO_REPO_ROOT` environment override
//! 2. container marker `/.dockerenv` plus `/app/backend` -> `/app`
//!    (not taken on Windows)
//! 3. two directories up from this crate's manifest, accepted when a `data`
//!    sibling exists
//! 4. the current working directory
//!
//! The resolver is the only stateful global; it reads the environment once
//! and caches the answer.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const REPO_ROOT_ENV: &str = "DEXTERIO_REPO_ROOT";

static REPO_ROOT: OnceLock<PathBuf> = OnceLock::new();

fn resolve_repo_root() -> PathBuf {
    if let Ok(override_path) = std::env::var(REPO_ROOT_ENV) {
        let p = PathBuf::from(override_path);
        if p.exists() {
            return p;
        }
    }

    #[cfg(not(windows))]
    {
        if Path::new("/.dockerenv").exists() && Path::new("/app/backend").exists() {
            return PathBuf::from("/app");
        }
    }

    // this crate lives at <repo>/dexterio-runner
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if let Some(candidate) = manifest_dir.parent() {
        if candidate.join("data").exists() {
            return candidate.to_path_buf();
        }
    }

    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Cached repo root.
pub fn repo_root() -> &'static Path {
    REPO_ROOT.get_or_init(resolve_repo_root)
}

/// `<repo>/data/historical/<timeframe>/`
pub fn historical_data_dir(root: &Path, timeframe: &str) -> PathBuf {
    root.join("data").join("historical").join(timeframe)
}

/// `<repo>/results/`
pub fn results_root(root: &Path) -> PathBuf {
    root.join("results")
}

/// `<results_root>/jobs/<job_id>/`
pub fn job_dir(results_root: &Path, job_id: &str) -> PathBuf {
    results_root.join("jobs").join(job_id)
}

/// Locate the 1m parquet for a symbol under a data directory.
///
/// Prefers `SYM.parquet`, then `sym.parquet`, then the legacy glob
/// `sym_1m_*.parquet`.
pub fn discover_symbol_parquet(data_dir: &Path, symbol: &str) -> Option<PathBuf> {
    let upper = data_dir.join(format!("{}.parquet", symbol.to_uppercase()));
    if upper.exists() {
        return Some(upper);
    }
    let lower = data_dir.join(format!("{}.parquet", symbol.to_lowercase()));
    if lower.exists() {
        return Some(lower);
    }

    let prefix = format!("{}_1m_", symbol.to_lowercase());
    let mut matches: Vec<PathBuf> = std::fs::read_dir(data_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("parquet")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix))
                    .unwrap_or(false)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovery_prefers_uppercase_then_lowercase_then_glob() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();

        fs::write(d.join("spy_1m_2024.parquet"), b"x").unwrap();
        assert_eq!(
            discover_symbol_parquet(d, "SPY").unwrap().file_name().unwrap(),
            "spy_1m_2024.parquet"
        );

        fs::write(d.join("spy.parquet"), b"x").unwrap();
        assert_eq!(discover_symbol_parquet(d, "SPY").unwrap().file_name().unwrap(), "spy.parquet");

        fs::write(d.join("SPY.parquet"), b"x").unwrap();
        assert_eq!(discover_symbol_parquet(d, "SPY").unwrap().file_name().unwrap(), "SPY.parquet");
    }

    #[test]
    fn discovery_misses_return_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_symbol_parquet(dir.path(), "QQQ").is_none());
    }

    #[test]
    fn legacy_glob_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        fs::write(d.join("spy_1m_b.parquet"), b"x").unwrap();
        fs::write(d.join("spy_1m_a.parquet"), b"x").unwrap();
        assert_eq!(
            discover_symbol_parquet(d, "SPY").unwrap().file_name().unwrap(),
            "spy_1m_a.parquet"
        );
    }

    #[test]
    fn job_dir_layout() {
        let jd = job_dir(Path::new("/tmp/results"), "job_abc");
        assert_eq!(jd, PathBuf::from("/tmp/results/jobs/job_abc"));
    }
}
