//! Detection and extraction of x402 payment challenges.
//!
//! A protected resource refuses an unpaid request with `402 Payment Required`,
//! a `WWW-Authenticate` header naming the `X402-Payment` scheme, and one header
//! per payment term:
//!
//! ```text
//! HTTP/1.1 402 Payment Required
//! WWW-Authenticate: X402-Payment realm="example.com"
//! X402-Payment-Address: 0xaa...
//! X402-Payment-Amount: 0.01
//! X402-Payment-Currency: MOVE
//! ```
//!
//! Servers in the wild also send the unprefixed `Payment-Address`,
//! `Payment-Amount` and `Payment-Currency` names. Both spellings are resolved
//! here, once, into a single [`PaymentChallenge`].
//!
//! There is no price negotiation: a challenge whose amount or currency differs
//! from the configured [`ExpectedPayment`] is a [`ValidationError`].

use http::{HeaderMap, StatusCode, header};
use serde::{Deserialize, Serialize};

use crate::money_amount::{Currency, MoneyAmount};
use crate::timestamp::UnixTimestamp;

/// Authentication scheme token that marks a 402 as belonging to this protocol.
pub const X402_AUTH_SCHEME: &str = "X402-Payment";

/// Header names for the payment address, in priority order.
pub const ADDRESS_HEADERS: &[&str] = &["X402-Payment-Address", "Payment-Address"];
/// Header names for the payment amount, in priority order.
pub const AMOUNT_HEADERS: &[&str] = &["X402-Payment-Amount", "Payment-Amount"];
/// Header names for the payment currency, in priority order.
pub const CURRENCY_HEADERS: &[&str] = &["X402-Payment-Currency", "Payment-Currency"];

/// The single price this client accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedPayment {
    pub amount: MoneyAmount,
    pub currency: Currency,
}

/// Structured payment terms extracted from a refusal, or synthesized for a renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChallenge {
    pub payment_address: String,
    pub amount: MoneyAmount,
    pub currency: Currency,
    pub issued_at: UnixTimestamp,
}

/// A challenge that is recognizably x402 but cannot be accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unexpected payment amount {found:?}, expected {expected}")]
    AmountMismatch {
        expected: MoneyAmount,
        found: String,
    },
    #[error("Unexpected payment currency {found:?}, expected {expected}")]
    CurrencyMismatch { expected: Currency, found: String },
    #[error("Payment address is empty")]
    EmptyAddress,
    #[error("Header {0} is not readable text")]
    UnreadableHeader(&'static str),
    #[error("No payment address is configured for renewing an expired access window")]
    NoRenewalAddress,
}

impl PaymentChallenge {
    /// Extracts the challenge from a refusal response.
    ///
    /// Returns `Ok(None)` when the response is not an x402 challenge at all:
    /// wrong status, no `X402-Payment` scheme in `WWW-Authenticate`, or one of
    /// the three payment headers missing. Such a 402 may belong to an unrelated
    /// scheme and is not an error here.
    pub fn from_response(
        status: StatusCode,
        headers: &HeaderMap,
        expected: &ExpectedPayment,
        now: UnixTimestamp,
    ) -> Result<Option<Self>, ValidationError> {
        if !is_x402_challenge(status, headers) {
            return Ok(None);
        }
        let (Some(address), Some(amount), Some(currency)) = (
            first_header(headers, ADDRESS_HEADERS)?,
            first_header(headers, AMOUNT_HEADERS)?,
            first_header(headers, CURRENCY_HEADERS)?,
        ) else {
            return Ok(None);
        };
        Self::validated(address, amount, currency, expected, now).map(Some)
    }

    /// Builds the challenge for an expiry renewal from the statically configured terms.
    ///
    /// The server did not issue structured terms in this case, so nothing from
    /// the refusal is used.
    pub fn synthesized(
        address: Option<&str>,
        expected: &ExpectedPayment,
        now: UnixTimestamp,
    ) -> Result<Self, ValidationError> {
        let address = address
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(ValidationError::NoRenewalAddress)?;
        Ok(Self {
            payment_address: address.to_string(),
            amount: expected.amount,
            currency: expected.currency,
            issued_at: now,
        })
    }

    fn validated(
        address: &str,
        amount: &str,
        currency: &str,
        expected: &ExpectedPayment,
        now: UnixTimestamp,
    ) -> Result<Self, ValidationError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ValidationError::EmptyAddress);
        }
        let parsed_amount = MoneyAmount::parse(amount)
            .ok()
            .filter(|a| *a == expected.amount)
            .ok_or_else(|| ValidationError::AmountMismatch {
                expected: expected.amount,
                found: amount.to_string(),
            })?;
        let parsed_currency = currency
            .parse::<Currency>()
            .ok()
            .filter(|c| *c == expected.currency)
            .ok_or_else(|| ValidationError::CurrencyMismatch {
                expected: expected.currency,
                found: currency.to_string(),
            })?;
        Ok(Self {
            payment_address: address.to_string(),
            amount: parsed_amount,
            currency: parsed_currency,
            issued_at: now,
        })
    }
}

/// Whether a response is a well-formed x402 challenge, ignoring the payment values.
pub fn is_x402_challenge(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::PAYMENT_REQUIRED
        && names_x402_scheme(headers)
        && [ADDRESS_HEADERS, AMOUNT_HEADERS, CURRENCY_HEADERS]
            .iter()
            .all(|names| names.iter().any(|name| headers.contains_key(*name)))
}

fn names_x402_scheme(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(|c: char| c.is_whitespace() || c == ','))
        .any(|token| token.eq_ignore_ascii_case(X402_AUTH_SCHEME))
}

fn first_header<'a>(
    headers: &'a HeaderMap,
    names: &[&'static str],
) -> Result<Option<&'a str>, ValidationError> {
    for name in names {
        if let Some(value) = headers.get(*name) {
            return value
                .to_str()
                .map(Some)
                .map_err(|_| ValidationError::UnreadableHeader(name));
        }
    }
    Ok(None)
}
