//! # Dexterio runner
//!
//! Batch execution layer around the core engine.
//!
//! ## Components
//!
//! - `RunConfig`: TOML configuration for a single backtest
//! - `runner::run`: the deterministic bar loop producing trades, equity,
//!   metrics, and instrumentation
//! - `MetricsReport`: locked-formula aggregates, net and gross
//! - `export`: parquet/JSON artifact writers
//! - `JobManager`: persisted job records with a bounded worker pool

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod instrument;
pub mod jobs;
pub mod metrics;
pub mod paths;
pub mod runner;

pub use config::RunConfig;
pub use error::{ConfigErrorKind, DataErrorKind, RunError};
pub use instrument::DebugCounts;
pub use jobs::{JobManager, JobRecord, JobStatus};
pub use metrics::MetricsReport;
pub use runner::{run, RunOutcome, RunStatus};
