//! # Domain Models
//!
//! Value types shared by the caches and the normalization engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated ticker: stock, currency (`EUR=X`) or currency pair (`EURJPY=X`) |
//! | [`Currency`] | ISO 4217 code |
//! | [`UtcDateTime`] | UTC timestamp |
//! | [`PricePoint`] | `(timestamp, value, volume)` observation |
//! | [`Series`] | Strictly time-ordered points |
//! | [`SecuritySnapshot`] | Currency and exchange metadata for a security |
//! | [`SecurityHistory`] | Snapshot plus daily closes |

mod currency;
mod models;
mod snapshot;
mod symbol;
mod timestamp;

pub use currency::{validate_currency_code, Currency, PIVOT_CURRENCY};
pub use models::{PricePoint, SecurityHistory, Series};
pub use snapshot::SecuritySnapshot;
pub use symbol::{Symbol, SymbolKind};
pub use timestamp::UtcDateTime;
