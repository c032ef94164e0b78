//! Expresses security histories in a common base.
//!
//! Every cross rate is routed through the pivot currency (USD). For a symbol
//! `S` quoted in currency `C` and a base `B` quoted in `D`:
//!
//! ```text
//! rate(t) = S(t) / USD→C(t) * USD→D(t) / B(t)
//! ```
//!
//! Factors that are not needed (pivot currency, currency symbols standing for
//! one unit of their currency) are identities. Each factor is read through the
//! [`Interpolator`] because the legs are not co-dated.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CoalescingCache, ParallelProducerCache};
use crate::fetch::HistoryFetcher;
use crate::source::{validate_history_days, HistorySource, HistoryWindow};
use crate::{
    Currency, EngineConfig, EngineError, Interpolator, Outcome, PricePoint, SecurityHistory,
    Series, Symbol, UtcDateTime, ValidationError,
};

/// Normalized series per requested symbol.
pub type NormalizedBatch = BTreeMap<Symbol, Outcome<Series>>;

const MIN_OWN_POINTS: usize = 1;
const MIN_RATE_POINTS: usize = 2;

/// Validated normalization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeRequest {
    symbols: BTreeSet<Symbol>,
    base: Option<Symbol>,
}

impl NormalizeRequest {
    pub fn new(
        symbols: impl IntoIterator<Item = Symbol>,
        base: Option<Symbol>,
    ) -> Result<Self, ValidationError> {
        let symbols: BTreeSet<Symbol> = symbols.into_iter().collect();
        if symbols.is_empty() {
            return Err(ValidationError::EmptyRequest);
        }
        if let Some(base) = &base {
            if base.is_currency_rate() {
                return Err(ValidationError::CurrencyRateBase {
                    value: base.to_string(),
                });
            }
        }
        Ok(Self { symbols, base })
    }

    /// Parses raw tickers; fails on the first invalid one.
    pub fn parse<S: AsRef<str>>(
        symbols: impl IntoIterator<Item = S>,
        base: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let symbols = symbols
            .into_iter()
            .map(|symbol| Symbol::parse(symbol.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let base = base.map(Symbol::parse).transpose()?;
        Self::new(symbols, base)
    }

    pub fn symbols(&self) -> &BTreeSet<Symbol> {
        &self.symbols
    }

    pub fn base(&self) -> Option<&Symbol> {
        self.base.as_ref()
    }
}

/// One factor of a cross rate.
#[derive(Debug, Clone, Copy)]
enum Leg<'a> {
    Identity,
    Series {
        symbol: &'a Symbol,
        series: &'a Series,
    },
}

impl<'a> Leg<'a> {
    fn series(&self) -> Option<&'a Series> {
        match self {
            Self::Identity => None,
            Self::Series { series, .. } => Some(*series),
        }
    }

    /// A one-point series can only be read at its own date.
    fn value_at(&self, interpolator: &Interpolator, at: UtcDateTime) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::Series { series, .. } if series.len() < 2 => match series.search(at) {
                Ok(index) => series.points()[index].value,
                Err(_) => f64::NAN,
            },
            Self::Series { series, .. } => interpolator.value_at(series, at),
        }
    }
}

/// A symbol or base reduced to what composition needs: its own history
/// (absent for currency symbols) and the currency it is quoted in.
#[derive(Debug, Clone)]
struct Side<'a> {
    symbol: &'a Symbol,
    history: Option<&'a SecurityHistory>,
    currency: Currency,
}

impl<'a> Side<'a> {
    fn resolve(
        symbol: &'a Symbol,
        histories: &'a HashMap<Symbol, Outcome<SecurityHistory>>,
    ) -> Result<Self, String> {
        if symbol.is_currency() {
            let currency = symbol
                .currency()
                .ok_or_else(|| format!("currency symbol {symbol} names no currency"))?;
            return Ok(Self {
                symbol,
                history: None,
                currency,
            });
        }

        let history = match histories.get(symbol) {
            Some(Outcome::Value(history)) => history,
            Some(Outcome::Error(message)) => return Err(format!("no history for {symbol}: {message}")),
            Some(Outcome::Empty) | None => return Err(format!("no history for {symbol}")),
        };
        let currency = if symbol.is_currency_rate() {
            symbol.currency()
        } else {
            history.snapshot.currency.clone()
        }
        .ok_or_else(|| format!("missing currency code for {symbol}"))?;

        Ok(Self {
            symbol,
            history: Some(history),
            currency,
        })
    }

    fn own_leg(&self) -> Leg<'a> {
        match self.history {
            Some(history) => Leg::Series {
                symbol: self.symbol,
                series: &history.closes,
            },
            None => Leg::Identity,
        }
    }

    fn live_quote(&self) -> Option<(UtcDateTime, f64)> {
        self.history.and_then(|history| history.snapshot.live_quote())
    }

    fn rate_symbol(&self) -> Option<Symbol> {
        (!self.currency.is_pivot()).then(|| Symbol::for_currency(&self.currency))
    }
}

/// The four factors of `S / USD→C * USD→D / B`.
#[derive(Debug, Clone, Copy)]
struct ConversionPlan<'a> {
    own: Leg<'a>,
    own_currency: Leg<'a>,
    base_currency: Leg<'a>,
    base_own: Leg<'a>,
}

impl<'a> ConversionPlan<'a> {
    fn legs(&self) -> [Leg<'a>; 4] {
        [self.own, self.own_currency, self.base_currency, self.base_own]
    }

    /// Series whose timestamps the composed series is sampled on.
    fn timeline(&self) -> Option<&'a Series> {
        self.legs().iter().find_map(Leg::series)
    }

    fn rate_at(&self, interpolator: &Interpolator, at: UtcDateTime) -> f64 {
        self.own.value_at(interpolator, at) / self.own_currency.value_at(interpolator, at)
            * self.base_currency.value_at(interpolator, at)
            / self.base_own.value_at(interpolator, at)
    }

    /// Own histories are sampled on their own dates and need one point.
    /// Rate series are interpolated and need two.
    fn check_legs(&self) -> Result<(), String> {
        let required = [
            (self.own, MIN_OWN_POINTS),
            (self.own_currency, MIN_RATE_POINTS),
            (self.base_currency, MIN_RATE_POINTS),
            (self.base_own, MIN_OWN_POINTS),
        ];
        for (leg, min_points) in required {
            if let Leg::Series { symbol, series } = leg {
                assert!(
                    series.is_strictly_increasing(),
                    "history of {symbol} must be strictly increasing before composition"
                );
                if series.len() < min_points {
                    return Err(format!(
                        "insufficient history for {symbol}: {} point(s), need at least {min_points}",
                        series.len()
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Per-symbol progress through a normalization batch.
#[derive(Debug)]
enum Resolution<'a> {
    Pending,
    Resolving(Side<'a>),
    Composed(Series),
    Failed(String),
}

impl Resolution<'_> {
    fn into_outcome(self) -> Outcome<Series> {
        match self {
            Self::Composed(series) => Outcome::Value(series),
            Self::Failed(message) => Outcome::Error(message),
            Self::Pending | Self::Resolving(_) => Outcome::Empty,
        }
    }
}

/// Normalizes security histories into a base currency or security.
///
/// Requested securities and stock bases are read through a batch
/// [`CoalescingCache`], so every symbol of one request sees histories of the
/// same production round. USD rate series (`EUR=X`, `JPY=X`, ...) are shared
/// by many requests and go through a per-key [`ParallelProducerCache`].
pub struct NormalizationEngine {
    histories: CoalescingCache<Symbol, Outcome<SecurityHistory>>,
    rates: ParallelProducerCache<Symbol, Outcome<SecurityHistory>>,
    interpolator: Interpolator,
    history_days: u32,
}

impl NormalizationEngine {
    pub fn new(source: Arc<dyn HistorySource>, config: &EngineConfig) -> Self {
        let fetcher = Arc::new(HistoryFetcher::new(source, config));
        Self {
            histories: CoalescingCache::new("histories", fetcher.clone(), config.history_ttl),
            rates: ParallelProducerCache::new("rates", fetcher, config.rate_ttl),
            interpolator: Interpolator::from_std(config.past_limit, config.future_limit),
            history_days: config.history_days,
        }
    }

    pub fn histories(&self) -> &CoalescingCache<Symbol, Outcome<SecurityHistory>> {
        &self.histories
    }

    pub fn rates(&self) -> &ParallelProducerCache<Symbol, Outcome<SecurityHistory>> {
        &self.rates
    }

    /// Raw histories of `symbols`, read through the history cache.
    pub async fn history(
        &self,
        symbols: &BTreeSet<Symbol>,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<Symbol, Outcome<SecurityHistory>>, EngineError> {
        if symbols.is_empty() {
            return Err(ValidationError::EmptyRequest.into());
        }
        validate_history_days(self.history_days)?;
        let keys: HashSet<Symbol> = symbols.iter().cloned().collect();
        let mut histories = self.histories.get(&keys, cancel).await?;
        Ok(symbols
            .iter()
            .map(|symbol| {
                let history = histories.remove(symbol).unwrap_or_default();
                (symbol.clone(), history)
            })
            .collect())
    }

    /// Normalizes every requested symbol against the request's base.
    ///
    /// Data problems of one symbol are reported as its [`Outcome::Error`].
    /// The batch as a whole fails only when a production round fails or is
    /// cancelled.
    pub async fn normalize(
        &self,
        request: &NormalizeRequest,
        cancel: &CancellationToken,
    ) -> Result<NormalizedBatch, EngineError> {
        let domain = HistoryWindow::trailing_days(UtcDateTime::now(), self.history_days)?;
        let wanted = history_keys(request);
        debug!(
            symbols = request.symbols.len(),
            histories = wanted.len(),
            base = request.base.as_ref().map(Symbol::as_str),
            "normalizing batch"
        );
        let histories = self.histories.get(&wanted, cancel).await?;

        let Some(base) = request.base() else {
            return Ok(request
                .symbols
                .iter()
                .map(|symbol| (symbol.clone(), self.own_series(symbol, &histories)))
                .collect());
        };

        let base_side = Side::resolve(base, &histories)
            .map_err(|message| format!("cannot resolve base {base}: {message}"));

        let mut states: BTreeMap<&Symbol, Resolution<'_>> = request
            .symbols
            .iter()
            .map(|symbol| (symbol, Resolution::Pending))
            .collect();

        for (symbol, state) in states.iter_mut() {
            *state = if *symbol == base {
                Resolution::Composed(Series::identity(domain.start(), domain.end()))
            } else {
                match (&base_side, Side::resolve(*symbol, &histories)) {
                    (Err(message), _) => Resolution::Failed(message.clone()),
                    (Ok(_), Err(message)) => Resolution::Failed(message),
                    (Ok(_), Ok(side)) => Resolution::Resolving(side),
                }
            };
        }

        let mut rate_symbols: HashSet<Symbol> = states
            .values()
            .filter_map(|state| match state {
                Resolution::Resolving(side) => side.rate_symbol(),
                _ => None,
            })
            .collect();
        let resolving = states
            .values()
            .any(|state| matches!(state, Resolution::Resolving(_)));
        if let (true, Ok(base_side)) = (resolving, &base_side) {
            rate_symbols.extend(base_side.rate_symbol());
        }
        let rates = self.rates.get_many(&rate_symbols, cancel).await?;

        if let Ok(base_side) = &base_side {
            for state in states.values_mut() {
                if let Resolution::Resolving(side) = state {
                    *state = match self.compose(side, base_side, &rates, &domain) {
                        Ok(series) => Resolution::Composed(series),
                        Err(message) => Resolution::Failed(message),
                    };
                }
            }
        }

        let mut failed = 0;
        let batch: NormalizedBatch = states
            .into_iter()
            .map(|(symbol, state)| {
                if let Resolution::Failed(message) = &state {
                    failed += 1;
                    warn!(%symbol, %base, reason = %message, "normalization failed for symbol");
                }
                (symbol.clone(), state.into_outcome())
            })
            .collect();
        info!(
            symbols = batch.len(),
            failed,
            rates = rate_symbols.len(),
            %base,
            "normalized batch"
        );
        Ok(batch)
    }

    /// A symbol's own closes with its live quote spliced in.
    fn own_series(
        &self,
        symbol: &Symbol,
        histories: &HashMap<Symbol, Outcome<SecurityHistory>>,
    ) -> Outcome<Series> {
        let Some(Outcome::Value(history)) = histories.get(symbol) else {
            return match histories.get(symbol) {
                Some(Outcome::Error(message)) => Outcome::error(format!("no history for {symbol}: {message}")),
                _ => Outcome::error(format!("no history for {symbol}")),
            };
        };

        let mut series = history.closes.clone();
        if let Some((at, price)) = history.snapshot.live_quote() {
            splice_live_point(symbol, &mut series, PricePoint::new(at, price, 0));
        }
        if series.is_empty() {
            return Outcome::error(format!("no history for {symbol}"));
        }
        Outcome::Value(series)
    }

    fn compose(
        &self,
        side: &Side<'_>,
        base: &Side<'_>,
        rates: &HashMap<Symbol, Outcome<SecurityHistory>>,
        domain: &HistoryWindow,
    ) -> Result<Series, String> {
        let plan = ConversionPlan {
            own: side.own_leg(),
            own_currency: rate_leg(&side.currency, rates)?,
            base_currency: rate_leg(&base.currency, rates)?,
            base_own: base.own_leg(),
        };
        plan.check_legs()?;

        let Some(timeline) = plan.timeline() else {
            // Every factor is an identity: the symbol is the base in disguise.
            return Ok(Series::identity(domain.start(), domain.end()));
        };
        let volumes = matches!(plan.own, Leg::Series { .. });

        let points: Vec<PricePoint> = timeline
            .points()
            .iter()
            .filter_map(|point| {
                let value = plan.rate_at(&self.interpolator, point.ts);
                let volume = if volumes { point.volume } else { 0 };
                value
                    .is_finite()
                    .then(|| PricePoint::new(point.ts, value, volume))
            })
            .collect();
        if points.is_empty() {
            return Err(format!(
                "no overlapping dates between {} and {}",
                side.symbol, base.symbol
            ));
        }
        let mut composed = Series::new(points)
            .expect("points sampled from an ordered timeline stay ordered");

        if let Some((at, price)) = side.live_quote() {
            let own = price / plan.own_currency.value_at(&self.interpolator, at)
                * plan.base_currency.value_at(&self.interpolator, at);
            let base_own = match base.live_quote() {
                Some((_, base_price)) => base_price,
                None => plan.base_own.value_at(&self.interpolator, at),
            };
            let value = own / base_own;
            if value.is_finite() {
                splice_live_point(side.symbol, &mut composed, PricePoint::new(at, value, 0));
            } else {
                debug!(symbol = %side.symbol, "live quote falls outside the rate series");
            }
        }

        Ok(composed)
    }
}

/// Histories the request needs from the batch cache.
fn history_keys(request: &NormalizeRequest) -> HashSet<Symbol> {
    match request.base() {
        None => request.symbols.iter().cloned().collect(),
        Some(base) => request
            .symbols
            .iter()
            .filter(|symbol| *symbol != base && !symbol.is_currency())
            .chain((!base.is_currency()).then_some(base))
            .cloned()
            .collect(),
    }
}

fn rate_leg<'a>(
    currency: &Currency,
    rates: &'a HashMap<Symbol, Outcome<SecurityHistory>>,
) -> Result<Leg<'a>, String> {
    if currency.is_pivot() {
        return Ok(Leg::Identity);
    }
    let symbol = Symbol::for_currency(currency);
    match rates.get_key_value(&symbol) {
        Some((symbol, Outcome::Value(history))) => Ok(Leg::Series {
            symbol,
            series: &history.closes,
        }),
        Some((_, Outcome::Error(message))) => Err(format!("missing rate series {symbol}: {message}")),
        Some((_, Outcome::Empty)) | None => Err(format!("missing rate series {symbol}")),
    }
}

/// Appends the live point, dropping history it supersedes.
///
/// # Panics
///
/// Panics if the spliced series is no longer strictly increasing.
fn splice_live_point(symbol: &Symbol, series: &mut Series, live: PricePoint) {
    if series
        .last()
        .is_some_and(|last| last.ts == live.ts && last.value == live.value)
    {
        return;
    }

    let dropped = series.splice_latest(live);
    if dropped > 0 {
        warn!(%symbol, dropped, live = %live.ts, "live quote superseded trailing history points");
    }
    assert!(
        series.is_strictly_increasing(),
        "series of {symbol} is not strictly increasing after the live splice"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(value: &str) -> Symbol {
        Symbol::parse(value).expect("valid symbol")
    }

    fn ts(day: i64) -> UtcDateTime {
        UtcDateTime::from_unix_timestamp(1_700_000_000 + day * 86_400).expect("valid timestamp")
    }

    fn series(points: &[(i64, f64)]) -> Series {
        Series::new(
            points
                .iter()
                .map(|(day, value)| PricePoint::new(ts(*day), *value, 0))
                .collect(),
        )
        .expect("ordered")
    }

    #[test]
    fn request_rejects_empty_and_rate_bases() {
        assert_eq!(
            NormalizeRequest::parse(Vec::<&str>::new(), None),
            Err(ValidationError::EmptyRequest)
        );
        assert_eq!(
            NormalizeRequest::parse(["AAPL"], Some("EURUSD=X")),
            Err(ValidationError::CurrencyRateBase {
                value: String::from("EURUSD=X")
            })
        );
        let request = NormalizeRequest::parse(["msft", "aapl", "AAPL"], Some("JPY=X"))
            .expect("valid request");
        assert_eq!(request.symbols().len(), 2);
        assert_eq!(request.base(), Some(&symbol("JPY=X")));
    }

    #[test]
    fn history_keys_skip_base_and_currency_symbols() {
        let request = NormalizeRequest::parse(["AAPL", "EUR=X", "SAP.DE"], Some("AAPL")).expect("valid");
        let keys = history_keys(&request);

        assert_eq!(keys, HashSet::from([symbol("AAPL"), symbol("SAP.DE")]));

        let request = NormalizeRequest::parse(["AAPL"], Some("JPY=X")).expect("valid");
        assert_eq!(history_keys(&request), HashSet::from([symbol("AAPL")]));
    }

    #[test]
    fn plan_divides_and_multiplies_legs() {
        let s = symbol("SAP.DE");
        let c = symbol("EUR=X");
        let own = series(&[(0, 100.0), (2, 120.0)]);
        let rate = series(&[(0, 2.0), (2, 4.0)]);
        let plan = ConversionPlan {
            own: Leg::Series { symbol: &s, series: &own },
            own_currency: Leg::Series { symbol: &c, series: &rate },
            base_currency: Leg::Identity,
            base_own: Leg::Identity,
        };
        let interpolator = Interpolator::default();

        assert_eq!(plan.rate_at(&interpolator, ts(0)), 50.0);
        assert_eq!(plan.rate_at(&interpolator, ts(1)), 110.0 / 3.0);
        assert_eq!(plan.timeline(), Some(&own));
    }

    #[test]
    fn short_legs_are_reported() {
        let c = symbol("EUR=X");
        let rate = series(&[(0, 2.0)]);
        let plan = ConversionPlan {
            own: Leg::Identity,
            own_currency: Leg::Series { symbol: &c, series: &rate },
            base_currency: Leg::Identity,
            base_own: Leg::Identity,
        };

        let message = plan.check_legs().expect_err("one point is not enough");
        assert!(message.contains("EUR=X"));
    }

    #[test]
    fn one_point_own_series_is_read_at_its_own_date() {
        let s = symbol("SAP.DE");
        let c = symbol("EUR=X");
        let own = series(&[(0, 100.0)]);
        let rate = series(&[(0, 2.0), (1, 2.0)]);
        let plan = ConversionPlan {
            own: Leg::Series { symbol: &s, series: &own },
            own_currency: Leg::Series { symbol: &c, series: &rate },
            base_currency: Leg::Identity,
            base_own: Leg::Identity,
        };
        let interpolator = Interpolator::default();

        assert_eq!(plan.check_legs(), Ok(()));
        assert_eq!(plan.rate_at(&interpolator, ts(0)), 50.0);
        assert!(plan.rate_at(&interpolator, ts(1)).is_nan());
    }

    #[test]
    fn empty_own_series_is_reported() {
        let s = symbol("SAP.DE");
        let own = Series::default();
        let plan = ConversionPlan {
            own: Leg::Series { symbol: &s, series: &own },
            own_currency: Leg::Identity,
            base_currency: Leg::Identity,
            base_own: Leg::Identity,
        };

        let message = plan.check_legs().expect_err("no points");
        assert!(message.contains("need at least 1"), "{message}");
    }

    #[test]
    fn live_splice_replaces_superseded_points() {
        let s = symbol("AAPL");
        let mut closes = series(&[(0, 1.0), (1, 2.0), (2, 3.0)]);

        splice_live_point(&s, &mut closes, PricePoint::new(ts(1), 5.0, 0));

        assert_eq!(closes.len(), 2);
        assert_eq!(closes.last().map(|point| point.value), Some(5.0));
    }

    #[test]
    fn live_splice_skips_identical_point() {
        let s = symbol("AAPL");
        let mut closes = series(&[(0, 1.0), (1, 2.0)]);

        splice_live_point(&s, &mut closes, PricePoint::new(ts(1), 2.0, 0));

        assert_eq!(closes, series(&[(0, 1.0), (1, 2.0)]));
    }
}
