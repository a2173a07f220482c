//! Run-level error taxonomy.
//!
//! `ConfigError` and `DataError` abort before any bar is processed;
//! `StateError` is an internal invariant violation; `Runtime` wraps
//! unexpected component failures that could not be contained.

use thiserror::Error;

use dexterio_core::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    InvalidConfig,
    PlaybookConfigInvalid,
    UnknownMode,
}

impl ConfigErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigErrorKind::InvalidConfig => "invalid_config",
            ConfigErrorKind::PlaybookConfigInvalid => "playbook_config_invalid",
            ConfigErrorKind::UnknownMode => "unknown_mode",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataErrorKind {
    DataFileNotFound,
    Unsorted,
    DuplicateTimestamps,
    InvalidBar,
    SchemaMismatch,
}

impl DataErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DataErrorKind::DataFileNotFound => "data_file_not_found",
            DataErrorKind::Unsorted => "unsorted_bars",
            DataErrorKind::DuplicateTimestamps => "duplicate_timestamps",
            DataErrorKind::InvalidBar => "invalid_bar",
            DataErrorKind::SchemaMismatch => "schema_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error ({}): {message}", kind.as_str())]
    Config { kind: ConfigErrorKind, message: String },

    #[error("data error ({}): {message}", kind.as_str())]
    Data { kind: DataErrorKind, message: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("runtime failure: {0}")]
    Runtime(String),
}

impl RunError {
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        RunError::Config { kind, message: message.into() }
    }

    pub fn data(kind: DataErrorKind, message: impl Into<String>) -> Self {
        RunError::Data { kind, message: message.into() }
    }

    /// Short machine-readable kind, persisted in `job.json`.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Config { kind, .. } => kind.as_str(),
            RunError::Data { kind, .. } => kind.as_str(),
            RunError::State(_) => "state_error",
            RunError::Runtime(_) => "runtime_failure",
        }
    }

    /// CLI exit code: 2 config, 3 data, 5 runtime/state.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config { .. } => 2,
            RunError::Data { .. } => 3,
            RunError::State(_) | RunError::Runtime(_) => 5,
        }
    }
}
