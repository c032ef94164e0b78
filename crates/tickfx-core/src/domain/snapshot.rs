use serde_json::{Map, Value};
use time::macros::{format_description, time};
use time::{Date, PrimitiveDateTime, Time, UtcOffset};
use time_tz::{timezones, Offset, TimeZone};

use crate::domain::{Currency, Symbol, UtcDateTime};
use crate::SnapshotError;

/// Regular-session close assumed when an exchange does not report one.
const DEFAULT_CLOSE_TIME: Time = time!(16:00);

/// Per-security metadata reported alongside a price history.
#[derive(Debug, Clone, PartialEq)]
pub struct SecuritySnapshot {
    pub symbol: Symbol,
    pub name: Option<String>,
    pub currency: Option<Currency>,
    /// IANA zone name. Used to resolve the exchange offset of each date.
    pub exchange_timezone: Option<String>,
    /// Offset the source reported for the current date. Fallback when the
    /// zone is unknown.
    pub utc_offset: UtcOffset,
    pub exchange_close_time: Option<Time>,
    /// Live quote in major units, when the source reports one.
    pub last_price: Option<f64>,
    pub last_price_time: Option<UtcDateTime>,
    /// Quoted prices per major unit of `currency` (100 for `GBp`). Already
    /// applied to `last_price`; sources apply it to closes.
    pub quote_divisor: f64,
}

impl SecuritySnapshot {
    /// Snapshot with no exchange metadata: UTC, default close, no live price.
    pub fn new(symbol: Symbol, currency: Option<Currency>) -> Self {
        Self {
            symbol,
            name: None,
            currency,
            exchange_timezone: None,
            utc_offset: UtcOffset::UTC,
            exchange_close_time: None,
            last_price: None,
            last_price_time: None,
            quote_divisor: 1.0,
        }
    }

    pub fn with_timezone(mut self, name: impl Into<String>) -> Self {
        self.exchange_timezone = Some(name.into());
        self
    }

    pub fn with_exchange(mut self, utc_offset: UtcOffset, close_time: Time) -> Self {
        self.utc_offset = utc_offset;
        self.exchange_close_time = Some(close_time);
        self
    }

    pub fn with_last_price(mut self, price: f64, at: UtcDateTime) -> Self {
        self.last_price = Some(price);
        self.last_price_time = Some(at);
        self
    }

    /// Offset of the exchange at `instant`, from its time zone when the zone
    /// is known and from the reported offset otherwise.
    pub fn offset_at(&self, instant: UtcDateTime) -> UtcOffset {
        match self.exchange_timezone.as_deref().and_then(timezones::get_by_name) {
            Some(zone) => zone.get_offset_utc(&instant.into_inner()).to_utc(),
            None => self.utc_offset,
        }
    }

    /// Exchange-local calendar date of `instant`.
    pub fn trading_date(&self, instant: UtcDateTime) -> Date {
        instant.date_at(self.offset_at(instant))
    }

    /// Absolute instant at which trading closed on `date` at this exchange.
    pub fn close_instant(&self, date: Date) -> UtcDateTime {
        let close = PrimitiveDateTime::new(date, self.exchange_close_time.unwrap_or(DEFAULT_CLOSE_TIME));
        // The first guess may sit on the other side of a DST change; the
        // second resolution uses the offset in force at the close itself.
        let guess = UtcDateTime::from_instant(close.assume_offset(self.utc_offset));
        let first = UtcDateTime::from_instant(close.assume_offset(self.offset_at(guess)));
        UtcDateTime::from_instant(close.assume_offset(self.offset_at(first)))
    }

    /// Live price and its timestamp, when both are known and usable.
    pub fn live_quote(&self) -> Option<(UtcDateTime, f64)> {
        match (self.last_price_time, self.last_price) {
            (Some(at), Some(price)) if price.is_finite() => Some((at, price)),
            _ => None,
        }
    }

    /// Parse a provider metadata object.
    ///
    /// Fields are matched against an explicit name-to-setter table; unknown
    /// fields and `null` values are ignored. `symbol` is required.
    pub fn from_json(value: &Value) -> Result<Self, SnapshotError> {
        let object = value.as_object().ok_or(SnapshotError::NotAnObject)?;
        let mut builder = SnapshotBuilder::default();

        for (name, setter) in SNAPSHOT_FIELDS {
            match object.get(*name) {
                None | Some(Value::Null) => {}
                Some(field) => setter(&mut builder, field)?,
            }
        }

        builder.build()
    }
}

type FieldSetter = fn(&mut SnapshotBuilder, &Value) -> Result<(), SnapshotError>;

const SNAPSHOT_FIELDS: &[(&str, FieldSetter)] = &[
    ("symbol", set_symbol),
    ("longName", set_name),
    ("shortName", set_short_name),
    ("currency", set_currency),
    ("exchangeTimezoneName", set_timezone),
    ("gmtoffset", set_gmt_offset),
    ("exchangeCloseTime", set_close_time),
    ("currentTradingPeriod", set_trading_period),
    ("regularMarketPrice", set_market_price),
    ("regularMarketTime", set_market_time),
];

#[derive(Debug, Default)]
struct SnapshotBuilder {
    symbol: Option<Symbol>,
    name: Option<String>,
    short_name: Option<String>,
    currency: Option<Currency>,
    quote_divisor: Option<f64>,
    timezone: Option<String>,
    gmt_offset: Option<UtcOffset>,
    close_time: Option<Time>,
    regular_period_end: Option<i64>,
    market_price: Option<f64>,
    market_time: Option<UtcDateTime>,
}

impl SnapshotBuilder {
    fn build(self) -> Result<SecuritySnapshot, SnapshotError> {
        let symbol = self
            .symbol
            .ok_or(SnapshotError::MissingField { field: "symbol" })?;
        let utc_offset = self.gmt_offset.unwrap_or(UtcOffset::UTC);

        // An explicit close time wins over one derived from the trading period.
        let exchange_close_time = match (self.close_time, self.regular_period_end) {
            (Some(close), _) => Some(close),
            (None, Some(end)) => {
                let end = UtcDateTime::from_unix_timestamp(end).map_err(|error| {
                    SnapshotError::InvalidValue {
                        field: "currentTradingPeriod",
                        message: error.to_string(),
                    }
                })?;
                Some(end.into_inner().to_offset(utc_offset).time())
            }
            (None, None) => None,
        };

        let quote_divisor = self.quote_divisor.unwrap_or(1.0);
        Ok(SecuritySnapshot {
            symbol,
            name: self.name.or(self.short_name),
            currency: self.currency,
            exchange_timezone: self.timezone,
            utc_offset,
            exchange_close_time,
            last_price: self.market_price.map(|price| price / quote_divisor),
            last_price_time: self.market_time,
            quote_divisor,
        })
    }
}

fn expect_str<'a>(field: &'static str, value: &'a Value) -> Result<&'a str, SnapshotError> {
    value.as_str().ok_or(SnapshotError::WrongType {
        field,
        expected: "string",
    })
}

fn expect_f64(field: &'static str, value: &Value) -> Result<f64, SnapshotError> {
    value.as_f64().ok_or(SnapshotError::WrongType {
        field,
        expected: "number",
    })
}

fn expect_i64(field: &'static str, value: &Value) -> Result<i64, SnapshotError> {
    value.as_i64().ok_or(SnapshotError::WrongType {
        field,
        expected: "integer",
    })
}

fn expect_object<'a>(
    field: &'static str,
    value: &'a Value,
) -> Result<&'a Map<String, Value>, SnapshotError> {
    value.as_object().ok_or(SnapshotError::WrongType {
        field,
        expected: "object",
    })
}

fn invalid(field: &'static str, error: impl ToString) -> SnapshotError {
    SnapshotError::InvalidValue {
        field,
        message: error.to_string(),
    }
}

fn set_symbol(builder: &mut SnapshotBuilder, value: &Value) -> Result<(), SnapshotError> {
    let raw = expect_str("symbol", value)?;
    builder.symbol = Some(Symbol::parse(raw).map_err(|error| invalid("symbol", error))?);
    Ok(())
}

fn set_name(builder: &mut SnapshotBuilder, value: &Value) -> Result<(), SnapshotError> {
    builder.name = Some(expect_str("longName", value)?.to_owned());
    Ok(())
}

fn set_short_name(builder: &mut SnapshotBuilder, value: &Value) -> Result<(), SnapshotError> {
    builder.short_name = Some(expect_str("shortName", value)?.to_owned());
    Ok(())
}

fn set_currency(builder: &mut SnapshotBuilder, value: &Value) -> Result<(), SnapshotError> {
    let raw = expect_str("currency", value)?;
    let (currency, divisor) = Currency::parse_quoted(raw).map_err(|error| invalid("currency", error))?;
    builder.currency = Some(currency);
    builder.quote_divisor = Some(divisor);
    Ok(())
}

fn set_timezone(builder: &mut SnapshotBuilder, value: &Value) -> Result<(), SnapshotError> {
    builder.timezone = Some(expect_str("exchangeTimezoneName", value)?.to_owned());
    Ok(())
}

fn set_gmt_offset(builder: &mut SnapshotBuilder, value: &Value) -> Result<(), SnapshotError> {
    let seconds = expect_i64("gmtoffset", value)?;
    let seconds = i32::try_from(seconds).map_err(|error| invalid("gmtoffset", error))?;
    builder.gmt_offset =
        Some(UtcOffset::from_whole_seconds(seconds).map_err(|error| invalid("gmtoffset", error))?);
    Ok(())
}

fn set_close_time(builder: &mut SnapshotBuilder, value: &Value) -> Result<(), SnapshotError> {
    let raw = expect_str("exchangeCloseTime", value)?;
    let close = Time::parse(raw, format_description!("[hour]:[minute]"))
        .map_err(|error| invalid("exchangeCloseTime", error))?;
    builder.close_time = Some(close);
    Ok(())
}

fn set_trading_period(builder: &mut SnapshotBuilder, value: &Value) -> Result<(), SnapshotError> {
    let period = expect_object("currentTradingPeriod", value)?;
    let Some(regular) = period.get("regular") else {
        return Ok(());
    };
    let regular = expect_object("currentTradingPeriod", regular)?;
    if let Some(end) = regular.get("end") {
        builder.regular_period_end = Some(expect_i64("currentTradingPeriod", end)?);
    }
    Ok(())
}

fn set_market_price(builder: &mut SnapshotBuilder, value: &Value) -> Result<(), SnapshotError> {
    builder.market_price = Some(expect_f64("regularMarketPrice", value)?);
    Ok(())
}

fn set_market_time(builder: &mut SnapshotBuilder, value: &Value) -> Result<(), SnapshotError> {
    let seconds = expect_i64("regularMarketTime", value)?;
    builder.market_time = Some(
        UtcDateTime::from_unix_timestamp(seconds)
            .map_err(|error| invalid("regularMarketTime", error))?,
    );
    Ok(())
}
