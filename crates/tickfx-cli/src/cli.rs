//! CLI argument definitions for tickfx.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `normalize` | Express symbols' histories in a base currency or security |
//! | `history` | Fetch raw daily closes and metadata |
//!
//! # Examples
//!
//! ```bash
//! # AAPL and SAP in yen
//! tickfx normalize AAPL SAP.DE --base JPY=X --pretty
//!
//! # Ninety days of raw closes
//! tickfx history AAPL EUR=X --days 90
//! ```
//!
//! Engine tuning is read from `TICKFX_*` environment variables and log
//! verbosity from `RUST_LOG`.

use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};
use tickfx_core::MAX_HISTORY_DAYS;

/// tickfx - currency-normalized price histories
#[derive(Debug, Parser)]
#[command(name = "tickfx", author, version, about = "Currency-normalized price histories")]
pub struct Cli {
    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Exit with status 3 when any symbol failed.
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Normalize symbols into a base currency or security.
    Normalize(NormalizeArgs),
    /// Fetch daily closes and security metadata.
    History(HistoryArgs),
}

#[derive(Debug, Clone, Args)]
pub struct NormalizeArgs {
    /// Symbols to normalize (e.g. AAPL, SAP.DE, EUR=X).
    #[arg(required = true)]
    pub symbols: Vec<String>,

    /// Base currency (`JPY=X`) or security. Without a base each symbol is
    /// returned in its own currency.
    #[arg(long)]
    pub base: Option<String>,

    /// Days of history to fetch.
    #[arg(long, value_parser = history_days_parser())]
    pub days: Option<u32>,
}

#[derive(Debug, Clone, Args)]
pub struct HistoryArgs {
    #[arg(required = true)]
    pub symbols: Vec<String>,

    /// Days of history to fetch.
    #[arg(long, value_parser = history_days_parser())]
    pub days: Option<u32>,
}

fn history_days_parser() -> RangedU64ValueParser<u32> {
    RangedU64ValueParser::<u32>::new().range(1..=u64::from(MAX_HISTORY_DAYS))
}
