//! Classification of one fetch attempt, and the decision whether to pay.
//!
//! [`should_trigger_new_payment`] is a pure function of the attempt outcome and
//! the state of the current access window. It is the single place that tells
//! "never paid", "grant expired" and "refused for another reason" apart.

use http::{HeaderMap, StatusCode};
use x402_access_types::challenge::{ExpectedPayment, PaymentChallenge, ValidationError};
use x402_access_types::record::WindowState;
use x402_access_types::timestamp::UnixTimestamp;

/// What one HTTP attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(String),
    /// `402`. Carries the challenge when it is a well-formed x402 challenge.
    PaymentRequired(Option<PaymentChallenge>),
    /// `403`.
    AccessDenied,
    Other(StatusCode),
    TransportError(String),
}

impl AttemptOutcome {
    /// Classifies a received response.
    ///
    /// A recognizable x402 challenge with the wrong price is a [`ValidationError`]:
    /// there is no negotiation, and retrying cannot change the server's terms.
    pub fn classify(
        status: StatusCode,
        headers: &HeaderMap,
        body: String,
        expected: &ExpectedPayment,
        now: UnixTimestamp,
    ) -> Result<Self, ValidationError> {
        let outcome = match status {
            s if s.is_success() => AttemptOutcome::Success(body),
            StatusCode::PAYMENT_REQUIRED => AttemptOutcome::PaymentRequired(
                PaymentChallenge::from_response(status, headers, expected, now)?,
            ),
            StatusCode::FORBIDDEN => AttemptOutcome::AccessDenied,
            other => AttemptOutcome::Other(other),
        };
        Ok(outcome)
    }
}

/// Where the terms of a new payment come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeSource {
    /// Issued by the server in a `402`.
    Offered(PaymentChallenge),
    /// The grant lapsed and the server issued no terms; use the configured ones.
    Renewal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentDecision {
    Satisfied,
    Pay(ChallengeSource),
    /// Refused while the grant is still valid: not a payment problem.
    Blocked,
    /// Nothing to pay for; the fetch retry policy applies.
    NoPayment,
}

pub fn should_trigger_new_payment(outcome: &AttemptOutcome, window: WindowState) -> PaymentDecision {
    match outcome {
        AttemptOutcome::Success(_) => PaymentDecision::Satisfied,
        AttemptOutcome::PaymentRequired(Some(challenge)) => {
            PaymentDecision::Pay(ChallengeSource::Offered(challenge.clone()))
        }
        AttemptOutcome::AccessDenied | AttemptOutcome::PaymentRequired(None)
            if window.is_lapsed() =>
        {
            PaymentDecision::Pay(ChallengeSource::Renewal)
        }
        AttemptOutcome::AccessDenied => PaymentDecision::Blocked,
        AttemptOutcome::PaymentRequired(None)
        | AttemptOutcome::Other(_)
        | AttemptOutcome::TransportError(_) => PaymentDecision::NoPayment,
    }
}
