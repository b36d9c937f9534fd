use x402_access_types::challenge::ValidationError;

use crate::executor::PaymentError;
use crate::verifier::Verification;

/// Terminal failure of [`crate::AccessController::access`].
///
/// Every collaborator error is converted into one of these kinds at the
/// controller boundary.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// The server's payment terms are malformed or differ from the configured price.
    #[error("Invalid payment challenge: {0}")]
    Validation(#[from] ValidationError),
    #[error("Payment failed: {0}")]
    Payment(#[from] PaymentError),
    /// The proof was not accepted; a new payment is needed, not a resubmission.
    #[error("Payment verification failed: {0}")]
    Verification(Verification),
    #[error("Allow-list grant did not propagate within {0:?}")]
    PropagationTimeout(std::time::Duration),
    /// Refused while the access window is still valid. Needs investigation, never retried.
    #[error("Access denied while the paid access window is still valid ({remaining:?} left)")]
    Blocked { remaining: std::time::Duration },
    #[error("Gave up after {attempts} attempts and {payments} payments: {reason}")]
    Exhausted {
        attempts: u32,
        payments: u32,
        reason: String,
    },
    #[error("Cancelled")]
    Cancelled,
}

impl AccessError {
    /// Whether the outer loop may start over after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AccessError::Payment(_) | AccessError::Verification(_) | AccessError::PropagationTimeout(_)
        )
    }
}

/// Failure to wire a controller from configuration.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Transport(#[from] crate::http_transport::TransportError),
    #[error("Payment executor: {0}")]
    Executor(#[from] PaymentError),
    #[error("Propagation backoff: {0}")]
    Backoff(#[from] crate::waiter::BackoffError),
    #[error("Invalid proof header name: {0}")]
    ProofHeader(#[from] http::header::InvalidHeaderName),
    #[error("Failed to build HTTP client: {source}")]
    HttpClient {
        #[source]
        source: reqwest::Error,
    },
}
