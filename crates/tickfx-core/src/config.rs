use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::source::{validate_history_days, MAX_HISTORY_DAYS};
use crate::ValidationError;

/// Tuning knobs of a [`NormalizationEngine`](crate::NormalizationEngine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Lifetime of cached security histories. Zero disables caching.
    pub history_ttl: Duration,
    /// Lifetime of cached USD rate series. Zero disables caching.
    pub rate_ttl: Duration,
    /// How far before the first observation a series may still be read.
    pub past_limit: Duration,
    /// How far after the last observation a series may still be read.
    pub future_limit: Duration,
    /// Leaf fetches running at once within one production.
    pub max_concurrency: usize,
    pub quota_window: Duration,
    pub quota_limit: u32,
    /// Length of the history window fetched per symbol.
    pub history_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_ttl: Duration::from_secs(5 * 60),
            rate_ttl: Duration::from_secs(5 * 60),
            past_limit: Duration::from_secs(4 * 24 * 60 * 60),
            future_limit: Duration::from_secs(4 * 24 * 60 * 60),
            max_concurrency: 4,
            quota_window: Duration::from_secs(60),
            quota_limit: 120,
            history_days: 30,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with any `TICKFX_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`. Unparsable values are
    /// ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let secs = |name: &str| parse_var::<u64>(&lookup, name).map(Duration::from_secs);
        let hours = |name: &str| {
            parse_var::<u64>(&lookup, name).map(|hours| Duration::from_secs(hours * 60 * 60))
        };

        if let Some(ttl) = secs("TICKFX_HISTORY_TTL_SECS") {
            config.history_ttl = ttl;
        }
        if let Some(ttl) = secs("TICKFX_RATE_TTL_SECS") {
            config.rate_ttl = ttl;
        }
        if let Some(limit) = hours("TICKFX_PAST_LIMIT_HOURS") {
            config.past_limit = limit;
        }
        if let Some(limit) = hours("TICKFX_FUTURE_LIMIT_HOURS") {
            config.future_limit = limit;
        }
        if let Some(width) = parse_var::<usize>(&lookup, "TICKFX_MAX_CONCURRENCY") {
            config.max_concurrency = width.max(1);
        }
        if let Some(limit) = parse_var::<u32>(&lookup, "TICKFX_QUOTA_LIMIT") {
            config.quota_limit = limit;
        }
        if let Some(window) = secs("TICKFX_QUOTA_WINDOW_SECS") {
            config.quota_window = window;
        }
        if let Some(days) = parse_var::<u32>(&lookup, "TICKFX_HISTORY_DAYS") {
            match validate_history_days(days) {
                Ok(days) => config.history_days = days,
                Err(_) => warn!(
                    variable = "TICKFX_HISTORY_DAYS",
                    days,
                    max = MAX_HISTORY_DAYS,
                    "ignoring out-of-range history window"
                ),
            }
        }
        config
    }

    pub fn with_history_ttl(mut self, ttl: Duration) -> Self {
        self.history_ttl = ttl;
        self
    }

    pub fn with_rate_ttl(mut self, ttl: Duration) -> Self {
        self.rate_ttl = ttl;
        self
    }

    /// Sets both cache lifetimes.
    pub fn with_ttl(self, ttl: Duration) -> Self {
        self.with_history_ttl(ttl).with_rate_ttl(ttl)
    }

    pub fn with_limits(mut self, past_limit: Duration, future_limit: Duration) -> Self {
        self.past_limit = past_limit;
        self.future_limit = future_limit;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_quota(mut self, quota_window: Duration, quota_limit: u32) -> Self {
        self.quota_window = quota_window;
        self.quota_limit = quota_limit;
        self
    }

    /// Fails when `history_days` is outside `1..=MAX_HISTORY_DAYS`.
    pub fn with_history_days(mut self, history_days: u32) -> Result<Self, ValidationError> {
        self.history_days = validate_history_days(history_days)?;
        Ok(self)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}
