use thiserror::Error;

use crate::source::SourceError;

/// Validation and contract errors exposed by `tickfx-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter, digit or '^': '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },
    #[error("symbol '{value}' contains more than one '.'")]
    SymbolTooManyDots { value: String },
    #[error("symbol '{value}' has a malformed '=X' suffix")]
    SymbolInvalidSuffix { value: String },
    #[error("currency symbol '{value}' must be 3 letters followed by '=X'")]
    InvalidCurrencySymbol { value: String },
    #[error("currency rate symbol '{value}' must name two distinct currencies")]
    InvalidCurrencyRateSymbol { value: String },

    #[error("currency must be a 3-letter uppercase ISO code: '{value}'")]
    InvalidCurrency { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("unix timestamp {value} is out of range")]
    TimestampOutOfRange { value: i64 },

    #[error("series timestamps must be strictly increasing (index {index})")]
    NonMonotonicSeries { index: usize },

    #[error("request must include at least one symbol")]
    EmptyRequest,
    #[error("currency rate symbol '{value}' cannot be used as a base")]
    CurrencyRateBase { value: String },
    #[error("history window start must not be after its end")]
    InvertedWindow,
    #[error("history window of {days} day(s) is out of range (1..={max})")]
    HistoryWindowOutOfRange { days: u32, max: u32 },
}

/// Top-level error of a normalization batch.
///
/// Per-symbol data problems never surface here; they are reported inside the
/// batch output as [`Outcome::Error`](crate::Outcome::Error).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("history production failed: {0}")]
    Source(#[from] SourceError),
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Source(error) if error.kind() == crate::SourceErrorKind::Cancelled)
    }
}

/// Failure to read a [`SecuritySnapshot`](crate::SecuritySnapshot) out of provider JSON.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot payload must be a JSON object")]
    NotAnObject,
    #[error("snapshot field '{field}' is required")]
    MissingField { field: &'static str },
    #[error("snapshot field '{field}' must be a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("snapshot field '{field}' is invalid: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}
