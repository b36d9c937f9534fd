//! Wire format of the external collaborators.
//!
//! - Verification authority: `POST /verify` ([`VerifyRequest`] / [`VerifyResponse`])
//! - Access server: `GET /payment-info` ([`PaymentInfo`]) and
//!   `GET /check-access/{address}?resource={scope}` ([`CheckAccessResponse`])
//! - Project directory: `GET /api/projects/public?domain=...` ([`ProjectLookupResponse`])
//! - Wallet service: `POST /transfer` ([`TransferRequest`] / [`TransferResponse`])
//! - Public IP echo: `GET ?format=json` ([`IpEchoResponse`])
//!
//! Servers disagree on some field names. Each disagreement is resolved here
//! through a `Raw*` shape and a prioritized list of variants, so the rest of
//! the crate only ever sees one canonical structure.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money_amount::{Currency, MoneyAmount};
use crate::transaction::TransactionId;

/// Proof-of-payment submitted to the verification authority.
///
/// `client_ip` binds the proof to the requester, so a proof cannot be replayed
/// from another address.
///
/// ```json
/// {
///   "transactionId": "0x…",
///   "clientIP": "203.0.113.7",
///   "expectedAmount": 0.01,
///   "expectedCurrency": "MOVE",
///   "domain": "example.com"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub transaction_id: TransactionId,
    #[serde(rename = "clientIP")]
    pub client_ip: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub expected_amount: Decimal,
    pub expected_currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// The authority's answer. `verified` is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Informational payment terms published by the access server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawPaymentInfo")]
pub struct PaymentInfo {
    pub amount: Option<MoneyAmount>,
    pub currency: Option<String>,
    pub address: Option<String>,
    pub network: Option<String>,
    /// The requester address as seen by the access server.
    pub client_ip: Option<String>,
}

#[derive(Deserialize)]
struct RawPaymentInfo {
    #[serde(default)]
    amount: Option<MoneyAmount>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    client_ip: Option<String>,
    #[serde(default)]
    user_context: Option<RawUserContext>,
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Deserialize)]
struct RawUserContext {
    #[serde(default)]
    ip: Option<String>,
}

impl From<RawPaymentInfo> for PaymentInfo {
    fn from(raw: RawPaymentInfo) -> Self {
        let client_ip = [
            raw.client_ip,
            raw.user_context.and_then(|ctx| ctx.ip),
            raw.ip,
        ]
        .into_iter()
        .flatten()
        .find(|ip| !ip.trim().is_empty());
        PaymentInfo {
            amount: raw.amount,
            currency: raw.currency,
            address: raw.address,
            network: raw.network,
            client_ip,
        }
    }
}

/// Allow-list status of one requester address for one resource scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckAccessResponse {
    #[serde(default)]
    pub whitelisted: bool,
}

/// Envelope of the project directory lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProjectLookupResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub project: Option<ProjectRecord>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl fmt::Debug for ProjectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectRecord")
            .field("website_url", &self.website_url)
            .field("zone_id", &self.zone_id)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Transfer order sent to an external wallet service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub to: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// The same amount in the token's smallest unit (octas for MOVE).
    pub amount_base_units: u64,
    pub currency: Currency,
}

/// Wallet service answer; the transaction id field name varies between services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawTransferResponse")]
pub struct TransferResponse {
    pub transaction_id: Option<TransactionId>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransferResponse {
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default, rename = "transaction_id")]
    transaction_id_snake: Option<String>,
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl From<RawTransferResponse> for TransferResponse {
    fn from(raw: RawTransferResponse) -> Self {
        let transaction_id = [
            raw.transaction_id,
            raw.transaction_id_snake,
            raw.tx_hash,
            raw.hash,
        ]
        .into_iter()
        .flatten()
        .find(|id| !id.trim().is_empty())
        .map(TransactionId::new);
        TransferResponse {
            transaction_id,
            error: raw.error,
        }
    }
}

/// Body of a public IP echo service such as ipify.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IpEchoResponse {
    pub ip: String,
}
