use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static TRANSACTION_ID_SHAPE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").ok());

/// Opaque proof of a completed transfer, as returned by the payment executor.
///
/// The value is carried verbatim into verification requests and retry headers.
/// Well-formed identifiers are `0x` followed by 64 hex digits; see
/// [`TransactionId::is_well_formed`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub const PREFIX: &'static str = "0x";
    pub const HEX_LEN: usize = 64;

    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    /// Builds a well-formed identifier from a 32-byte transaction hash.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(format!("{}{}", Self::PREFIX, hex::encode(hash)))
    }

    /// Structural check only: fixed prefix plus fixed-length hex body.
    ///
    /// This says nothing about whether the transfer exists on chain.
    pub fn is_well_formed(&self) -> bool {
        TRANSACTION_ID_SHAPE
            .as_ref()
            .is_some_and(|shape| shape.is_match(&self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A shortened form for log lines, e.g. `0x1a2b3c4d…`.
    pub fn short(&self) -> &str {
        self.0.get(..10).unwrap_or(&self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TransactionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
