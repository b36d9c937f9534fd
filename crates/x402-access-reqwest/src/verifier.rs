//! Proof-of-payment verification against a remote authority.
//!
//! [`PaymentVerifier`] posts `{transactionId, clientIP, expectedAmount,
//! expectedCurrency}` to `{base}/verify`. The authority's `verified` flag is
//! authoritative. When the authority cannot be reached, the transaction id is
//! checked for the shape the executors emit instead. That check is only an
//! availability fallback, so its result is tagged
//! [`Verification::VerifiedDegraded`] and never reported as a plain success.
//!
//! Nothing here retries: a rejected proof needs a new payment, which is the
//! controller's decision.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use url::Url;
use x402_access_types::challenge::ExpectedPayment;
use x402_access_types::proto::{VerifyRequest, VerifyResponse};
use x402_access_types::transaction::TransactionId;

use crate::http_transport::{JsonTransport, TransportError, base_url, join};

/// Outcome of one verification call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    /// The authority confirmed the payment.
    Verified,
    /// The authority was unreachable; the transaction id only passed the shape check.
    VerifiedDegraded { reason: String },
    /// The authority answered and did not confirm the payment.
    Rejected { reason: String },
    /// The authority was unreachable and the transaction id failed the shape check.
    Unreachable { reason: String },
}

impl Verification {
    /// Whether the proof may be used. Degraded results count only when allowed.
    pub fn is_accepted(&self, allow_degraded: bool) -> bool {
        match self {
            Verification::Verified => true,
            Verification::VerifiedDegraded { .. } => allow_degraded,
            Verification::Rejected { .. } | Verification::Unreachable { .. } => false,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Verification::VerifiedDegraded { .. })
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Verified => write!(f, "verified"),
            Verification::VerifiedDegraded { reason } => {
                write!(f, "verified (degraded, shape check only): {reason}")
            }
            Verification::Rejected { reason } => write!(f, "rejected: {reason}"),
            Verification::Unreachable { reason } => write!(f, "unreachable: {reason}"),
        }
    }
}

/// Client of the verification authority.
#[derive(Clone, Debug)]
pub struct PaymentVerifier {
    base_url: Url,
    verify_url: Url,
    transport: JsonTransport,
    expected: ExpectedPayment,
    domain: Option<String>,
}

impl PaymentVerifier {
    pub fn try_new(base_url: Url, expected: ExpectedPayment) -> Result<Self, TransportError> {
        let verify_url = join(&base_url, "./verify", "Failed to construct ./verify URL")?;
        Ok(Self {
            base_url,
            verify_url,
            transport: JsonTransport::default(),
            expected,
            domain: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// Sets a timeout for every verification call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_timeout(timeout);
        self
    }

    /// Scopes every verification to a resource domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Verifies `transaction_id` as paid by `client_ip`.
    #[tracing::instrument(
        name = "x402.verifier.verify",
        skip_all,
        fields(tx = transaction_id.short(), client_ip = %client_ip, timeout = ?self.transport.timeout())
    )]
    pub async fn verify(&self, transaction_id: &TransactionId, client_ip: &str) -> Verification {
        let request = VerifyRequest {
            transaction_id: transaction_id.clone(),
            client_ip: client_ip.to_string(),
            expected_amount: self.expected.amount.0,
            expected_currency: self.expected.currency,
            domain: self.domain.clone(),
        };
        let result: Result<VerifyResponse, TransportError> = self
            .transport
            .post_json(&self.verify_url, "POST /verify", &request)
            .await;
        let verification = match result {
            Ok(VerifyResponse { verified: true, .. }) => Verification::Verified,
            Ok(VerifyResponse { error, .. }) => Verification::Rejected {
                reason: error.unwrap_or_else(|| "payment not verified".to_string()),
            },
            Err(err) if err.is_unreachable() => shape_fallback(transaction_id, &err),
            Err(err) => Verification::Rejected {
                reason: err.to_string(),
            },
        };
        match &verification {
            Verification::Verified => tracing::info!("Payment verified"),
            Verification::VerifiedDegraded { reason } => tracing::warn!(
                tx = transaction_id.short(),
                reason = %reason,
                "Verification authority unreachable, accepted on transaction id shape only"
            ),
            Verification::Rejected { reason } | Verification::Unreachable { reason } => {
                tracing::warn!(reason = %reason, "Payment verification failed")
            }
        }
        verification
    }
}

fn shape_fallback(transaction_id: &TransactionId, err: &TransportError) -> Verification {
    if transaction_id.is_well_formed() {
        Verification::VerifiedDegraded {
            reason: err.to_string(),
        }
    } else {
        Verification::Unreachable {
            reason: format!("{err}; transaction id is not well-formed"),
        }
    }
}

/// Converts a string URL into a `PaymentVerifier` with the given expected payment.
impl TryFrom<(&str, ExpectedPayment)> for PaymentVerifier {
    type Error = TransportError;

    fn try_from((value, expected): (&str, ExpectedPayment)) -> Result<Self, Self::Error> {
        let url = base_url(value, "Failed to parse verifier base url")?;
        PaymentVerifier::try_new(url, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_access_types::money_amount::{Currency, MoneyAmount};

    fn expected() -> ExpectedPayment {
        ExpectedPayment {
            amount: MoneyAmount::parse("0.01").unwrap(),
            currency: Currency::Move,
        }
    }

    fn well_formed() -> TransactionId {
        TransactionId::from_hash([0x5a; 32])
    }

    #[test]
    fn test_verify_url_is_relative_to_base() {
        let verifier =
            PaymentVerifier::try_from(("http://localhost:3000/api/x402-payment", expected()))
                .unwrap();
        assert_eq!(
            verifier.verify_url().as_str(),
            "http://localhost:3000/api/x402-payment/verify"
        );
    }

    #[tokio::test]
    async fn test_authority_confirms() {
        let server = MockServer::start().await;
        let tx = well_formed();
        Mock::given(method("POST"))
            .and(path("/api/verify"))
            .and(body_json(json!({
                "transactionId": tx.as_str(),
                "clientIP": "203.0.113.7",
                "expectedAmount": 0.01,
                "expectedCurrency": "MOVE",
                "domain": "example.com"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"verified": true})))
            .expect(1)
            .mount(&server)
            .await;

        let verifier = PaymentVerifier::try_from((format!("{}/api", server.uri()).as_str(), expected()))
            .unwrap()
            .with_domain("example.com");
        let verification = verifier.verify(&tx, "203.0.113.7").await;
        assert_eq!(verification, Verification::Verified);
        assert!(verification.is_accepted(false));
    }

    #[tokio::test]
    async fn test_authority_rejects() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "verified": false,
                "error": "transaction not found"
            })))
            .mount(&server)
            .await;

        let verifier = PaymentVerifier::try_from((server.uri().as_str(), expected())).unwrap();
        let verification = verifier.verify(&well_formed(), "203.0.113.7").await;
        assert_eq!(
            verification,
            Verification::Rejected {
                reason: "transaction not found".to_string()
            }
        );
        assert!(!verification.is_accepted(true));
    }

    #[tokio::test]
    async fn test_non_ok_status_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let verifier = PaymentVerifier::try_from((server.uri().as_str(), expected())).unwrap();
        let verification = verifier.verify(&well_formed(), "203.0.113.7").await;
        assert!(matches!(verification, Verification::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_falls_back_to_shape_check() {
        let verifier = PaymentVerifier::try_from(("http://127.0.0.1:1/", expected()))
            .unwrap()
            .with_timeout(Duration::from_secs(2));

        let degraded = verifier.verify(&well_formed(), "203.0.113.7").await;
        assert!(degraded.is_degraded(), "{degraded}");
        assert!(degraded.is_accepted(true));
        assert!(!degraded.is_accepted(false));

        let malformed = verifier
            .verify(&TransactionId::new("0x1234"), "203.0.113.7")
            .await;
        assert!(matches!(malformed, Verification::Unreachable { .. }));
        assert!(!malformed.is_accepted(true));
    }
}
