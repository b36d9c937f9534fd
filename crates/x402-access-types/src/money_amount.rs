use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// A human-readable token amount, such as `0.01` MOVE.
///
/// Parsing is strict: the input must be a plain decimal number, optionally
/// surrounded by whitespace. Currency symbols, thousands separators or any
/// trailing garbage are rejected rather than stripped, so that a perturbed
/// amount header never compares equal to the configured price.
///
/// Equality is numeric: `0.010` equals `0.01`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoneyAmount(pub Decimal);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        money_amount::MIN_STR,
        money_amount::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
}

mod money_amount {
    use super::*;
    use once_cell::sync::Lazy;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: Lazy<Decimal> =
        Lazy::new(|| Decimal::from_str(MIN_STR).unwrap_or(Decimal::ZERO));
    pub static MAX: Lazy<Decimal> =
        Lazy::new(|| Decimal::from_str(MAX_STR).unwrap_or(Decimal::MAX));
}

impl MoneyAmount {
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty()
            || !trimmed
                .chars()
                .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
        {
            return Err(MoneyAmountParseError::InvalidFormat);
        }
        let parsed =
            Decimal::from_str(trimmed).map_err(|_| MoneyAmountParseError::InvalidFormat)?;
        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }
        if parsed < *money_amount::MIN || parsed > *money_amount::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(parsed))
    }

    /// Converts the amount into the smallest on-chain unit given the token's decimals.
    ///
    /// MOVE has 8 decimals (1 MOVE = 100 000 000 octas). Returns `None` if the
    /// amount carries more precision than the token supports.
    pub fn as_base_units(&self, decimals: u32) -> Option<u128> {
        let scaled = self.0.checked_mul(Decimal::from(10u64.checked_pow(decimals)?))?;
        if scaled.fract() != Decimal::ZERO {
            return None;
        }
        scaled.to_u128()
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// The single currency this client is able to pay in.
///
/// The protocol has no price discovery, so there is deliberately only one
/// variant; anything else in a challenge is a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    #[serde(rename = "MOVE")]
    Move,
}

impl Currency {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Currency::Move => "MOVE",
        }
    }

    /// Number of decimals of the on-chain token.
    pub const fn decimals(&self) -> u32 {
        match self {
            Currency::Move => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported currency: {0}")]
pub struct UnsupportedCurrency(pub String);

impl FromStr for Currency {
    type Err = UnsupportedCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "MOVE" => Ok(Currency::Move),
            other => Err(UnsupportedCurrency(other.to_string())),
        }
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
