//! Per-symbol result carried through caches and batch outputs.

use std::fmt::Display;

use serde::Serialize;

/// Outcome of computing one value: a value, a data error, or nothing at all.
///
/// `Empty` means no value was computed and nothing went wrong, e.g. a slot
/// that was never requested. Business failures are `Error` and never abort
/// sibling symbols.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Outcome<T> {
    Value(T),
    Error(String),
    #[default]
    Empty,
}

impl<T> Outcome<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub const fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Outcome<&T> {
        match self {
            Self::Value(value) => Outcome::Value(value),
            Self::Error(message) => Outcome::Error(message.clone()),
            Self::Empty => Outcome::Empty,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Value(value) => Outcome::Value(f(value)),
            Self::Error(message) => Outcome::Error(message),
            Self::Empty => Outcome::Empty,
        }
    }
}

impl<T, E: Display> From<Result<T, E>> for Outcome<T> {
    fn from(value: Result<T, E>) -> Self {
        match value {
            Ok(value) => Self::Value(value),
            Err(error) => Self::Error(error.to_string()),
        }
    }
}
