//! [`HistorySource`](crate::HistorySource) implementations.
//!
//! | Source | Backend |
//! |--------|---------|
//! | [`YahooChartSource`] | Yahoo Finance v8 chart endpoint over an [`HttpClient`](crate::HttpClient) |
//! | [`StaticHistorySource`] | In-memory histories for tests and offline runs |

pub mod fixture;
pub mod yahoo;

pub use fixture::StaticHistorySource;
pub use yahoo::YahooChartSource;
