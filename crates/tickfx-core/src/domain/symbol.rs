use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::domain::Currency;
use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 20;
const CURRENCY_SUFFIX: &str = "=X";

/// What a ticker denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Any security quoted by an exchange (`AAPL`, `7203.T`, `^GSPC`).
    Stock,
    /// A single currency (`JPY=X`); its history is the USD to JPY rate.
    Currency,
    /// A currency pair (`EURJPY=X`): the price of one EUR in JPY.
    CurrencyRate,
}

/// Normalized market symbol.
///
/// Equality and ordering follow the normalized string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a symbol to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len,
                max: MAX_SYMBOL_LEN,
            });
        }

        if let Some(first) = normalized.chars().next() {
            if !(first.is_ascii_alphanumeric() || first == '^') {
                return Err(ValidationError::SymbolInvalidStart { ch: first });
            }
        }

        for (index, ch) in normalized.chars().enumerate() {
            let valid = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '^' | '=');
            if !valid {
                return Err(ValidationError::SymbolInvalidChar { ch, index });
            }
        }

        if normalized.matches('.').count() > 1 {
            return Err(ValidationError::SymbolTooManyDots { value: normalized });
        }

        if normalized.contains('=') {
            let suffix_ok = normalized.matches('=').count() == 1
                && normalized.ends_with(CURRENCY_SUFFIX);
            if !suffix_ok {
                return Err(ValidationError::SymbolInvalidSuffix { value: normalized });
            }
            validate_currency_stem(&normalized)?;
        }

        Ok(Self(normalized))
    }

    /// Currency symbol (`EUR=X`) for a currency code.
    pub fn for_currency(currency: &Currency) -> Self {
        Self(format!("{currency}{CURRENCY_SUFFIX}"))
    }

    /// Currency pair symbol (`EURJPY=X`) pricing `from` in `to`.
    pub fn for_currency_rate(from: &Currency, to: &Currency) -> Result<Self, ValidationError> {
        Self::parse(&format!("{from}{to}{CURRENCY_SUFFIX}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> SymbolKind {
        match self.stem().map(str::len) {
            Some(3) => SymbolKind::Currency,
            Some(6) => SymbolKind::CurrencyRate,
            _ => SymbolKind::Stock,
        }
    }

    pub fn is_stock(&self) -> bool {
        self.kind() == SymbolKind::Stock
    }

    pub fn is_currency(&self) -> bool {
        self.kind() == SymbolKind::Currency
    }

    pub fn is_currency_rate(&self) -> bool {
        self.kind() == SymbolKind::CurrencyRate
    }

    /// The currency this symbol is denominated in: the last three letters
    /// before `=X`. Stocks carry their currency in their snapshot instead.
    pub fn currency(&self) -> Option<Currency> {
        let stem = self.stem()?;
        Currency::parse(&stem[stem.len() - 3..]).ok()
    }

    /// The priced currency of a currency pair (`EUR` in `EURJPY=X`).
    pub fn base_currency(&self) -> Option<Currency> {
        match self.kind() {
            SymbolKind::CurrencyRate => self.stem().and_then(|stem| Currency::parse(&stem[..3]).ok()),
            _ => None,
        }
    }

    fn stem(&self) -> Option<&str> {
        self.0.strip_suffix(CURRENCY_SUFFIX)
    }
}

fn validate_currency_stem(normalized: &str) -> Result<(), ValidationError> {
    let stem = &normalized[..normalized.len() - CURRENCY_SUFFIX.len()];
    let letters = stem.chars().all(|ch| ch.is_ascii_alphabetic());

    match stem.len() {
        3 if letters => Ok(()),
        6 if letters => {
            if stem[..3] == stem[3..] {
                Err(ValidationError::InvalidCurrencyRateSymbol {
                    value: normalized.to_owned(),
                })
            } else {
                Ok(())
            }
        }
        _ => Err(ValidationError::InvalidCurrencySymbol {
            value: normalized.to_owned(),
        }),
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}
