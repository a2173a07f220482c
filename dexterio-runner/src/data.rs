//! Bar input: parquet loading and validation.
//!
//! One file per symbol with columns `{datetime, open, high, low, close,
//! volume}`, sorted ascending, no duplicate timestamps. Validation failures
//! abort the run before any bar is processed.

use chrono::{DateTime, TimeZone, Utc};
use polars::prelude::*;
use std::path::Path;

use dexterio_core::domain::Bar;

use crate::error::{DataErrorKind, RunError};

const REQUIRED_COLUMNS: [&str; 6] = ["datetime", "open", "high", "low", "close", "volume"];

/// Load and validate the 1m bars for one symbol.
pub fn load_bars(path: &Path, symbol: &str) -> Result<Vec<Bar>, RunError> {
    let file = std::fs::File::open(path).map_err(|e| {
        RunError::data(DataErrorKind::DataFileNotFound, format!("{}: {e}", path.display()))
    })?;
    let df = ParquetReader::new(file).finish().map_err(|e| {
        RunError::data(DataErrorKind::SchemaMismatch, format!("{}: {e}", path.display()))
    })?;

    for col in REQUIRED_COLUMNS {
        if df.column(col).is_err() {
            return Err(RunError::data(
                DataErrorKind::SchemaMismatch,
                format!("{}: missing column '{col}'", path.display()),
            ));
        }
    }

    let schema_err = |e: PolarsError| {
        RunError::data(DataErrorKind::SchemaMismatch, format!("{}: {e}", path.display()))
    };

    let datetimes = df
        .column("datetime")
        .map_err(schema_err)?
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
        .map_err(schema_err)?;
    let datetimes = datetimes.datetime().map_err(schema_err)?;

    let float_col = |name: &str| -> Result<Float64Chunked, RunError> {
        df.column(name)
            .map_err(schema_err)?
            .cast(&DataType::Float64)
            .map_err(schema_err)?
            .f64()
            .map_err(schema_err)
            .cloned()
    };
    let opens = float_col("open")?;
    let highs = float_col("high")?;
    let lows = float_col("low")?;
    let closes = float_col("close")?;
    let volumes = float_col("volume")?;

    let n = df.height();
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let millis = datetimes.get(i).ok_or_else(|| {
            RunError::data(DataErrorKind::InvalidBar, format!("{symbol}: null datetime at row {i}"))
        })?;
        let ts: DateTime<Utc> = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
            RunError::data(DataErrorKind::InvalidBar, format!("{symbol}: bad datetime at row {i}"))
        })?;

        let bar = Bar::new(
            ts,
            symbol,
            opens.get(i).unwrap_or(f64::NAN),
            highs.get(i).unwrap_or(f64::NAN),
            lows.get(i).unwrap_or(f64::NAN),
            closes.get(i).unwrap_or(f64::NAN),
            volumes.get(i).unwrap_or(f64::NAN),
        );
        bar.validate().map_err(|e| {
            RunError::data(DataErrorKind::InvalidBar, format!("{symbol} at {ts}: {e}"))
        })?;
        bars.push(bar);
    }

    for pair in bars.windows(2) {
        if pair[1].timestamp == pair[0].timestamp {
            return Err(RunError::data(
                DataErrorKind::DuplicateTimestamps,
                format!("{symbol} at {}", pair[1].timestamp),
            ));
        }
        if pair[1].timestamp < pair[0].timestamp {
            return Err(RunError::data(
                DataErrorKind::Unsorted,
                format!("{symbol}: {} after {}", pair[1].timestamp, pair[0].timestamp),
            ));
        }
    }

    Ok(bars)
}

/// Write bars to a parquet file (test fixtures and the market-state stream
/// share this path).
pub fn write_bars(path: &Path, bars: &[Bar]) -> Result<(), RunError> {
    let millis: Vec<i64> = bars.iter().map(|b| b.timestamp.timestamp_millis()).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let io_err =
        |e: PolarsError| RunError::Runtime(format!("parquet write {}: {e}", path.display()));

    let mut df = DataFrame::new(vec![
        Column::new("datetime".into(), millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(io_err)?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(io_err)?;

    let file = std::fs::File::create(path)
        .map_err(|e| RunError::Runtime(format!("create {}: {e}", path.display())))?;
    ParquetWriter::new(file).finish(&mut df).map_err(io_err)?;
    Ok(())
}
