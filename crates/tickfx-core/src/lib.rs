//! # tickfx Core
//!
//! History caching and currency normalization for the tickfx toolkit.
//!
//! ## Overview
//!
//! - **Coalescing caches** that merge concurrent lookups into shared
//!   production rounds
//! - **Interpolation** of daily series at arbitrary instants
//! - **Currency normalization** of security histories into any base, routed
//!   through USD rate series
//! - **History sources** (Yahoo chart endpoint, in-memory fixture)
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | History source implementations |
//! | [`cache`] | [`CoalescingCache`] and [`ParallelProducerCache`] |
//! | [`config`] | Engine tuning and `TICKFX_*` environment overrides |
//! | [`domain`] | Symbols, currencies, series and snapshots |
//! | [`error`] | Validation, snapshot and engine errors |
//! | [`fetch`] | Cache producer backed by a history source |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`interpolation`] | Series interpolation |
//! | [`normalization`] | Currency normalization engine |
//! | [`outcome`] | Per-symbol value/error/empty result |
//! | [`source`] | History source contract and source errors |
//! | [`throttle`] | Token-bucket pacing of leaf fetches |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use tickfx_core::{EngineConfig, NormalizationEngine, NormalizeRequest, YahooChartSource};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = NormalizationEngine::new(
//!         Arc::new(YahooChartSource::default()),
//!         &EngineConfig::from_env(),
//!     );
//!
//!     let request = NormalizeRequest::parse(["AAPL", "SAP.DE"], Some("JPY=X"))?;
//!     let batch = engine.normalize(&request, &CancellationToken::new()).await?;
//!
//!     for (symbol, outcome) in &batch {
//!         if let Some(last) = outcome.value().and_then(|series| series.last()) {
//!             println!("{symbol}: {:.2} JPY", last.value);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Malformed input fails synchronously with [`ValidationError`]. Data
//! problems of one symbol are reported as [`Outcome::Error`] inside the batch.
//! Source failures fail the whole batch:
//!
//! ```rust
//! use tickfx_core::{EngineError, SourceErrorKind};
//!
//! fn describe(error: &EngineError) -> &'static str {
//!     match error {
//!         EngineError::Validation(_) => "fix the request",
//!         EngineError::Source(source) if source.kind() == SourceErrorKind::RateLimited => "retry later",
//!         EngineError::Source(_) => "source unavailable",
//!     }
//! }
//! ```

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod http_client;
pub mod interpolation;
pub mod normalization;
pub mod outcome;
pub mod source;
pub mod throttle;

pub use adapters::{StaticHistorySource, YahooChartSource};

pub use cache::{BatchProducer, CoalescingCache, KeyProducer, ParallelProducerCache};

pub use config::EngineConfig;

pub use domain::{
    validate_currency_code, Currency, PricePoint, SecurityHistory, SecuritySnapshot, Series,
    Symbol, SymbolKind, UtcDateTime, PIVOT_CURRENCY,
};

pub use error::{EngineError, SnapshotError, ValidationError};

pub use fetch::HistoryFetcher;

pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

pub use interpolation::Interpolator;

pub use normalization::{NormalizationEngine, NormalizeRequest, NormalizedBatch};

pub use outcome::Outcome;

pub use source::{
    validate_history_days, HistorySource, HistoryWindow, SourceError, SourceErrorKind,
    SourceFuture, MAX_HISTORY_DAYS,
};

pub use throttle::FetchThrottle;
