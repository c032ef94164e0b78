use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Fixed intermediate currency every cross rate is routed through.
pub const PIVOT_CURRENCY: &str = "USD";

/// Provider codes for prices quoted in a minor unit: code, major currency,
/// minor units per major unit.
const MINOR_UNITS: &[(&str, &str, f64)] = &[
    ("GBp", "GBP", 100.0),
    ("GBX", "GBP", 100.0),
    ("ZAc", "ZAR", 100.0),
    ("ZAC", "ZAR", 100.0),
    ("ILA", "ILS", 100.0),
];

/// ISO 4217 currency code, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        validate_currency_code(input).map(Self)
    }

    /// Parses the currency a provider quotes prices in.
    ///
    /// Minor-unit codes (`GBp` pence, `ZAc` cents, `ILA` agorot) resolve to
    /// their major currency together with the divisor that turns quoted
    /// prices into major units. Every other code has divisor 1.
    pub fn parse_quoted(input: &str) -> Result<(Self, f64), ValidationError> {
        let trimmed = input.trim();
        if let Some((_, major, divisor)) = MINOR_UNITS.iter().find(|(code, ..)| *code == trimmed) {
            return Ok((Self((*major).to_owned()), *divisor));
        }
        Self::parse(trimmed).map(|currency| (currency, 1.0))
    }

    pub fn pivot() -> Self {
        Self(PIVOT_CURRENCY.to_owned())
    }

    pub fn is_pivot(&self) -> bool {
        self.0 == PIVOT_CURRENCY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// Validate and normalize currency to uppercase 3-letter code.
pub fn validate_currency_code(input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_uppercase();
    let is_valid = normalized.len() == 3 && normalized.chars().all(|ch| ch.is_ascii_alphabetic());

    if !is_valid {
        return Err(ValidationError::InvalidCurrency {
            value: input.to_owned(),
        });
    }

    Ok(normalized)
}
