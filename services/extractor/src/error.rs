//! Error types for the extraction pipeline.
//!
//! Only undecodable input is an error. Unrecognized structure, unmatched labels
//! and filtered records all resolve to best-effort (possibly empty) output.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to parse {kind} input: {reason}")]
    Parse { kind: &'static str, reason: String },

    #[error("Unsupported file type '{0}'. Supported: .xlsx, .xls, .xlsb, .ods, .csv, .json")]
    UnsupportedFile(String),

    #[error("File too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub(crate) fn parse(kind: &'static str, reason: impl ToString) -> Self {
        Self::Parse {
            kind,
            reason: reason.to_string(),
        }
    }

    /// True for malformed-input failures (as opposed to validation or IO).
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
