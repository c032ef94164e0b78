//! History source contract and source-level errors.
//!
//! A [`HistorySource`] is the leaf of the system: it fetches one symbol's
//! snapshot and daily closes. Everything above it (caches, fetcher, engine)
//! only ever talks to sources through this trait.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::{SecurityHistory, Symbol, UtcDateTime, ValidationError};

/// Boxed future returned by sources and cache producers.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Source-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    InvalidRequest,
    NotFound,
    Incomplete,
    Cancelled,
    Internal,
}

/// Structured error shared by sources, producers and caches.
///
/// Clonable so that one failed production can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    fn with_kind(kind: SourceErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Unavailable, message, true)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::RateLimited, message, true)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::InvalidRequest, message, false)
    }

    pub fn not_found(symbol: &Symbol) -> Self {
        Self::with_kind(
            SourceErrorKind::NotFound,
            format!("no history available for '{symbol}'"),
            false,
        )
    }

    /// A producer returned without a value for a requested key.
    pub fn incomplete(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Incomplete, message, true)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Cancelled, message, false)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Internal, message, false)
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::Incomplete => "source.incomplete",
            SourceErrorKind::Cancelled => "source.cancelled",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

impl From<ValidationError> for SourceError {
    fn from(error: ValidationError) -> Self {
        Self::invalid_request(error.to_string())
    }
}

/// Longest history window a request may ask for, about a century.
pub const MAX_HISTORY_DAYS: u32 = 36_600;

/// Checks a window length against `1..=MAX_HISTORY_DAYS`.
pub fn validate_history_days(days: u32) -> Result<u32, ValidationError> {
    if (1..=MAX_HISTORY_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(ValidationError::HistoryWindowOutOfRange {
            days,
            max: MAX_HISTORY_DAYS,
        })
    }
}

/// Closed time range of requested history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    start: UtcDateTime,
    end: UtcDateTime,
}

impl HistoryWindow {
    pub fn new(start: UtcDateTime, end: UtcDateTime) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedWindow);
        }
        Ok(Self { start, end })
    }

    /// The `days` days leading up to `end`.
    pub fn trailing_days(end: UtcDateTime, days: u32) -> Result<Self, ValidationError> {
        let days = validate_history_days(days)?;
        let start = end
            .checked_sub(time::Duration::days(i64::from(days)))
            .ok_or(ValidationError::HistoryWindowOutOfRange {
                days,
                max: MAX_HISTORY_DAYS,
            })?;
        Ok(Self { start, end })
    }

    pub const fn start(&self) -> UtcDateTime {
        self.start
    }

    pub const fn end(&self) -> UtcDateTime {
        self.end
    }

    pub fn contains(&self, at: UtcDateTime) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Fetches the snapshot and daily closes of one symbol.
///
/// Implementations must be `Send + Sync`; one source is shared by every
/// production the engine starts. Dropping the returned future or cancelling
/// `cancel` abandons the fetch.
pub trait HistorySource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    fn history<'a>(
        &'a self,
        symbol: &'a Symbol,
        window: HistoryWindow,
        cancel: CancellationToken,
    ) -> SourceFuture<'a, SecurityHistory>;
}
