//! The payment-gated access state machine.
//!
//! ```text
//! Idle -> Attempting -> Satisfied
//!                    -> Blocked
//!                    -> NeedsPayment -> Paying -> Verifying -> Waiting -> Attempting
//!                    -> (retry after delay) -> Attempting | Exhausted
//! ```
//!
//! Each attempt is classified into an [`AttemptOutcome`], and
//! [`should_trigger_new_payment`] decides what happens next. A payment cycle
//! replaces the current [`PaymentRecord`] only once every step succeeded.
//!
//! One controller serves one target. Controllers never share payment state.

use http::header::{HeaderName, InvalidHeaderName};
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use x402_access_types::challenge::{ExpectedPayment, PaymentChallenge, ValidationError};
use x402_access_types::config::{AccessConfig, ProofHeaderConfig};
use x402_access_types::record::{AccessWindow, PaymentRecord, WindowState};
use x402_access_types::transaction::TransactionId;

use crate::access_server::AccessServerClient;
use crate::clock::Clock;
use crate::directory::ProjectCredentials;
use crate::error::{AccessError, SetupError};
use crate::executor::{self, PaymentExecutor};
use crate::outcome::{AttemptOutcome, ChallengeSource, PaymentDecision, should_trigger_new_payment};
use crate::verifier::{PaymentVerifier, Verification};
use crate::waiter::{AllowlistProbe, AllowlistWaiter, AssumePropagated, BackoffPolicy};

/// The limits and terms one controller runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    pub expected: ExpectedPayment,
    /// Payee for renewals when the server issues no fresh terms.
    pub renewal_address: Option<String>,
    pub whitelist_duration: Duration,
    pub fetch_timeout: Duration,
    pub propagation_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_payment_cycles: u32,
    pub allow_degraded: bool,
}

impl From<&AccessConfig> for AccessPolicy {
    fn from(config: &AccessConfig) -> Self {
        AccessPolicy {
            expected: config.expected_payment(),
            renewal_address: config.payment.address.clone(),
            whitelist_duration: config.payment.whitelist_duration,
            fetch_timeout: config.timeouts.fetch,
            propagation_timeout: config.timeouts.propagation,
            max_retries: config.retry.max_retries,
            retry_delay: config.retry.delay,
            max_payment_cycles: config.retry.max_payment_cycles,
            allow_degraded: config.verifier.allow_degraded,
        }
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        AccessPolicy::from(&AccessConfig::default())
    }
}

/// Names of the header carrying the proof on retried requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofHeaders {
    canonical: HeaderName,
    aliases: Vec<HeaderName>,
}

impl ProofHeaders {
    pub fn canonical(&self) -> &HeaderName {
        &self.canonical
    }

    /// The canonical name followed by every alias, without duplicates.
    pub fn names(&self) -> impl Iterator<Item = &HeaderName> {
        std::iter::once(&self.canonical).chain(
            self.aliases
                .iter()
                .filter(move |alias| **alias != self.canonical),
        )
    }
}

impl TryFrom<&ProofHeaderConfig> for ProofHeaders {
    type Error = InvalidHeaderName;

    fn try_from(config: &ProofHeaderConfig) -> Result<Self, Self::Error> {
        let canonical = HeaderName::try_from(config.name.as_str())?;
        let mut aliases: Vec<HeaderName> = Vec::with_capacity(config.aliases.len());
        for alias in &config.aliases {
            let alias = HeaderName::try_from(alias.as_str())?;
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        Ok(Self { canonical, aliases })
    }
}

impl Default for ProofHeaders {
    fn default() -> Self {
        ProofHeaders {
            canonical: HeaderName::from_static("x-payment-proof"),
            aliases: vec![HeaderName::from_static("x-payment-hash")],
        }
    }
}

/// Successful access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGranted {
    pub content: String,
    pub status: StatusCode,
    /// Payment cycles completed during this call.
    pub payments: u32,
    /// Proof sent with the successful request, if any.
    pub transaction_id: Option<TransactionId>,
    /// How the current proof was verified. Check for the degraded tag before trusting it.
    pub verification: Option<Verification>,
}

pub struct AccessController {
    target: Url,
    requester_ip: String,
    http: reqwest::Client,
    policy: AccessPolicy,
    proof_headers: ProofHeaders,
    executor: Arc<dyn PaymentExecutor>,
    verifier: PaymentVerifier,
    waiter: AllowlistWaiter,
    clock: Arc<dyn Clock>,
    current: Option<PaymentRecord>,
    last_verification: Option<Verification>,
}

impl AccessController {
    pub fn new(
        target: Url,
        requester_ip: impl Into<String>,
        policy: AccessPolicy,
        executor: Arc<dyn PaymentExecutor>,
        verifier: PaymentVerifier,
        waiter: AllowlistWaiter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            target,
            requester_ip: requester_ip.into(),
            http: reqwest::Client::new(),
            policy,
            proof_headers: ProofHeaders::default(),
            executor,
            verifier,
            waiter,
            clock,
            current: None,
            last_verification: None,
        }
    }

    /// Wires every collaborator from configuration.
    ///
    /// The waiter polls `/check-access` when an access server is configured,
    /// and otherwise assumes propagation once the floor delay has passed.
    pub fn from_config(
        config: &AccessConfig,
        project: &ProjectCredentials,
        requester_ip: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SetupError> {
        let requester_ip = requester_ip.into();
        let policy = AccessPolicy::from(config);
        let executor = executor::from_config(&config.executor, policy.expected, clock.clone())?;
        let mut verifier =
            PaymentVerifier::try_from((config.verifier.url.as_str(), policy.expected))?
                .with_timeout(config.timeouts.verify);
        if let Some(domain) = project.target_url.host_str() {
            verifier = verifier.with_domain(domain);
        }
        let probe: Arc<dyn AllowlistProbe> = match &config.access_server {
            Some(server) => Arc::new(
                AccessServerClient::try_new(server.url.clone())?
                    .with_timeout(config.timeouts.fetch)
                    .probe(requester_ip.clone(), project.allowlist_scope_id.clone()),
            ),
            None => Arc::new(AssumePropagated),
        };
        let waiter = AllowlistWaiter::new(
            BackoffPolicy::try_from(&config.propagation)?,
            probe,
            clock.clone(),
        );
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|source| SetupError::HttpClient { source })?;
        Ok(Self::new(
            project.target_url.clone(),
            requester_ip,
            policy,
            executor,
            verifier,
            waiter,
            clock,
        )
        .with_http_client(http)
        .with_proof_headers(ProofHeaders::try_from(&config.proof_header)?))
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_proof_headers(mut self, proof_headers: ProofHeaders) -> Self {
        self.proof_headers = proof_headers;
        self
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn current_record(&self) -> Option<&PaymentRecord> {
        self.current.as_ref()
    }

    pub fn access_window(&self) -> Option<AccessWindow> {
        self.current
            .as_ref()
            .map(|record| record.window(self.policy.whitelist_duration))
    }

    pub fn window_state(&self) -> WindowState {
        WindowState::of(self.access_window().as_ref(), self.clock.now())
    }

    /// Asks the allow-list probe once. Never touches payment state.
    pub async fn is_propagated(&self) -> bool {
        self.waiter.check().await
    }

    /// Fetches the target, paying for access as often as needed within the configured bounds.
    #[tracing::instrument(name = "x402.controller.access", skip_all, fields(target = %self.target))]
    pub async fn access(&mut self, cancel: &CancellationToken) -> Result<AccessGranted, AccessError> {
        let mut attempts = 0u32;
        let mut failures = 0u32;
        let mut payments = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(AccessError::Cancelled);
            }
            attempts += 1;
            let (status, outcome) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AccessError::Cancelled),
                attempt = self.attempt() => attempt?,
            };
            let window = self.window_state();
            let decision = should_trigger_new_payment(&outcome, window);
            tracing::debug!(attempts, ?status, ?window, ?decision, "Attempt classified");

            let reason = match decision {
                PaymentDecision::Satisfied => {
                    let content = match outcome {
                        AttemptOutcome::Success(content) => content,
                        _ => String::new(),
                    };
                    tracing::info!(attempts, payments, "Access granted");
                    return Ok(AccessGranted {
                        content,
                        status: status.unwrap_or(StatusCode::OK),
                        payments,
                        transaction_id: self.current.as_ref().map(|r| r.transaction_id.clone()),
                        verification: self.last_verification.clone(),
                    });
                }
                PaymentDecision::Blocked => {
                    let remaining = self
                        .access_window()
                        .map(|w| w.remaining_at(self.clock.now()))
                        .unwrap_or_default();
                    tracing::warn!(?remaining, "Denied while the access window is valid");
                    return Err(AccessError::Blocked { remaining });
                }
                PaymentDecision::Pay(source) => {
                    if payments >= self.policy.max_payment_cycles {
                        return Err(AccessError::Exhausted {
                            attempts,
                            payments,
                            reason: format!(
                                "payment still required after {payments} payment cycles"
                            ),
                        });
                    }
                    payments += 1;
                    match self.payment_cycle(source, cancel).await {
                        Ok(()) => continue,
                        Err(err) if err.is_retryable() => {
                            tracing::warn!(error = %err, "Payment cycle failed");
                            err.to_string()
                        }
                        Err(err) => return Err(err),
                    }
                }
                PaymentDecision::NoPayment => describe(&outcome),
            };

            failures += 1;
            if failures > self.policy.max_retries {
                return Err(AccessError::Exhausted {
                    attempts,
                    payments,
                    reason,
                });
            }
            tracing::info!(
                failures,
                max_retries = self.policy.max_retries,
                delay = ?self.policy.retry_delay,
                reason = %reason,
                "Retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AccessError::Cancelled),
                _ = self.clock.sleep(self.policy.retry_delay) => {}
            }
        }
    }

    /// One request to the target, carrying the current proof if there is one.
    async fn attempt(&self) -> Result<(Option<StatusCode>, AttemptOutcome), ValidationError> {
        let mut request = self
            .http
            .get(self.target.clone())
            .timeout(self.policy.fetch_timeout);
        if let Some(record) = &self.current {
            for name in self.proof_headers.names() {
                request = request.header(name, record.transaction_id.as_str());
            }
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Ok((None, AttemptOutcome::TransportError(err.to_string()))),
        };
        let status = response.status();
        let headers = response.headers().clone();
        let body = if status.is_success() {
            match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    return Ok((Some(status), AttemptOutcome::TransportError(err.to_string())));
                }
            }
        } else {
            String::new()
        };
        let outcome = AttemptOutcome::classify(
            status,
            &headers,
            body,
            &self.policy.expected,
            self.clock.now(),
        )?;
        Ok((Some(status), outcome))
    }

    /// Pay, verify, wait. The current record is replaced only when all three succeed.
    #[tracing::instrument(name = "x402.controller.payment_cycle", skip_all)]
    async fn payment_cycle(
        &mut self,
        source: ChallengeSource,
        cancel: &CancellationToken,
    ) -> Result<(), AccessError> {
        let challenge = match source {
            ChallengeSource::Offered(challenge) => challenge,
            ChallengeSource::Renewal => {
                tracing::info!("Access window lapsed, renewing with the configured terms");
                PaymentChallenge::synthesized(
                    self.policy.renewal_address.as_deref(),
                    &self.policy.expected,
                    self.clock.now(),
                )?
            }
        };
        if cancel.is_cancelled() {
            return Err(AccessError::Cancelled);
        }

        // Not cancellable: a transfer in flight must be allowed to finish.
        let record = self
            .executor
            .execute(&challenge.payment_address, &challenge.amount)
            .await?;
        tracing::info!(tx = record.transaction_id.short(), to = %record.address, "Payment executed");
        if cancel.is_cancelled() {
            tracing::warn!(tx = %record.transaction_id, "Cancelled after paying; proof not used");
            return Err(AccessError::Cancelled);
        }

        let verification = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AccessError::Cancelled),
            verification = self.verifier.verify(&record.transaction_id, &self.requester_ip) => {
                verification
            }
        };
        if !verification.is_accepted(self.policy.allow_degraded) {
            return Err(AccessError::Verification(verification));
        }

        let propagated = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AccessError::Cancelled),
            propagated = self.waiter.wait(self.policy.propagation_timeout) => propagated,
        };
        if !propagated {
            return Err(AccessError::PropagationTimeout(self.policy.propagation_timeout));
        }

        self.current = Some(record);
        self.last_verification = Some(verification);
        Ok(())
    }
}

fn describe(outcome: &AttemptOutcome) -> String {
    match outcome {
        AttemptOutcome::Success(_) => "success".to_string(),
        AttemptOutcome::PaymentRequired(_) => {
            "payment required without a usable challenge while the access window is valid"
                .to_string()
        }
        AttemptOutcome::AccessDenied => "access denied".to_string(),
        AttemptOutcome::Other(status) => format!("unexpected status {status}"),
        AttemptOutcome::TransportError(cause) => format!("transport error: {cause}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::executor::{PaymentError, SimulatedExecutor};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_access_types::config::PropagationConfig;
    use x402_access_types::money_amount::{Currency, MoneyAmount};
    use x402_access_types::timestamp::UnixTimestamp;

    const T0: u64 = 1_700_000_000;

    fn expected() -> ExpectedPayment {
        ExpectedPayment {
            amount: MoneyAmount::parse("0.01").unwrap(),
            currency: Currency::Move,
        }
    }

    fn policy() -> AccessPolicy {
        AccessPolicy {
            renewal_address: Some("0xstatic".to_string()),
            retry_delay: Duration::from_secs(1),
            ..AccessPolicy::default()
        }
    }

    fn challenge_response() -> ResponseTemplate {
        ResponseTemplate::new(402)
            .insert_header("WWW-Authenticate", "X402-Payment realm=\"test\"")
            .insert_header("X402-Payment-Address", "0xAA")
            .insert_header("X402-Payment-Amount", "0.01")
            .insert_header("X402-Payment-Currency", "MOVE")
    }

    /// Records every payee and delegates to the wrapped executor.
    struct Recording {
        inner: Box<dyn PaymentExecutor>,
        payees: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PaymentExecutor for Recording {
        async fn execute(
            &self,
            address: &str,
            amount: &MoneyAmount,
        ) -> Result<PaymentRecord, PaymentError> {
            if let Ok(mut payees) = self.payees.lock() {
                payees.push(address.to_string());
            }
            self.inner.execute(address, amount).await
        }
    }

    /// Wallet that turns every transfer down.
    struct Refusing;

    #[async_trait]
    impl PaymentExecutor for Refusing {
        async fn execute(
            &self,
            _address: &str,
            _amount: &MoneyAmount,
        ) -> Result<PaymentRecord, PaymentError> {
            Err(PaymentError::Refused("insufficient funds".to_string()))
        }
    }

    /// Cancels the run while the transfer is in flight, then completes it.
    struct CancelsMidTransfer {
        cancel: CancellationToken,
        inner: SimulatedExecutor,
    }

    #[async_trait]
    impl PaymentExecutor for CancelsMidTransfer {
        async fn execute(
            &self,
            address: &str,
            amount: &MoneyAmount,
        ) -> Result<PaymentRecord, PaymentError> {
            self.cancel.cancel();
            tokio::task::yield_now().await;
            self.inner.execute(address, amount).await
        }
    }

    struct CountingProbe {
        calls: AtomicU32,
        grants: bool,
    }

    #[async_trait]
    impl AllowlistProbe for CountingProbe {
        async fn is_allowlisted(&self) -> Result<bool, crate::http_transport::TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.grants)
        }
    }

    struct Harness {
        controller: AccessController,
        clock: ManualClock,
        executor: Arc<Recording>,
        probe: Arc<CountingProbe>,
    }

    async fn harness(server: &MockServer, policy: AccessPolicy) -> Harness {
        harness_with(server, policy, true, |expected, clock| {
            Box::new(SimulatedExecutor::new(expected, clock))
        })
        .await
    }

    async fn harness_with<F>(
        server: &MockServer,
        policy: AccessPolicy,
        grants: bool,
        executor: F,
    ) -> Harness
    where
        F: FnOnce(ExpectedPayment, Arc<dyn Clock>) -> Box<dyn PaymentExecutor>,
    {
        let clock = ManualClock::starting_at(UnixTimestamp::from_secs(T0));
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let executor = Arc::new(Recording {
            inner: executor(policy.expected, shared_clock.clone()),
            payees: Mutex::new(Vec::new()),
        });
        let probe = Arc::new(CountingProbe {
            calls: AtomicU32::new(0),
            grants,
        });
        let verifier_url = format!("{}/verifier", server.uri());
        let verifier = PaymentVerifier::try_from((verifier_url.as_str(), expected())).unwrap();
        let waiter = AllowlistWaiter::new(
            BackoffPolicy::try_from(&PropagationConfig::default()).unwrap(),
            probe.clone(),
            shared_clock.clone(),
        );
        let target: Url = format!("{}/resource", server.uri()).parse().unwrap();
        let controller = AccessController::new(
            target,
            "203.0.113.7",
            policy,
            executor.clone(),
            verifier,
            waiter,
            shared_clock,
        );
        Harness {
            controller,
            clock,
            executor,
            probe,
        }
    }

    async fn mount_verifier(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/verifier/verify"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"verified": true})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_pays_and_retries_with_proof_headers() {
        let server = MockServer::start().await;
        mount_verifier(&server).await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .and(header_exists("x-payment-proof"))
            .and(header_exists("x-payment-hash"))
            .respond_with(ResponseTemplate::new(200).set_body_string("paid content"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(challenge_response())
            .mount(&server)
            .await;

        let mut h = harness(&server, policy()).await;
        let granted = h.controller.access(&CancellationToken::new()).await.unwrap();
        assert_eq!(granted.content, "paid content");
        assert_eq!(granted.payments, 1);
        assert_eq!(granted.verification, Some(Verification::Verified));
        assert_eq!(
            granted.transaction_id.as_ref(),
            Some(&h.controller.current_record().unwrap().transaction_id)
        );
        assert_eq!(*h.executor.payees.lock().unwrap(), vec!["0xAA".to_string()]);
        assert_eq!(h.controller.window_state(), WindowState::Valid);
    }

    #[tokio::test]
    async fn test_denial_within_window_is_blocked() {
        let server = MockServer::start().await;
        mount_verifier(&server).await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .and(header_exists("x-payment-proof"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .and(header_exists("x-payment-proof"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(challenge_response())
            .mount(&server)
            .await;

        let mut h = harness(&server, policy()).await;
        h.controller.access(&CancellationToken::new()).await.unwrap();
        h.clock.advance(Duration::from_secs(10));

        let err = h.controller.access(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AccessError::Blocked { .. }), "{err}");
        assert_eq!(h.executor.payees.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_window_renews_with_static_address() {
        let server = MockServer::start().await;
        mount_verifier(&server).await;
        // Served in order: grant, then a bare denial, then the renewed grant.
        Mock::given(method("GET"))
            .and(path("/resource"))
            .and(header_exists("x-payment-proof"))
            .respond_with(ResponseTemplate::new(200).set_body_string("first"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .and(header_exists("x-payment-proof"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("X402-Payment-Address", "0xFROMBODY")
                    .set_body_string("{\"address\": \"0xFROMBODY\"}"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .and(header_exists("x-payment-proof"))
            .respond_with(ResponseTemplate::new(200).set_body_string("renewed"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(challenge_response())
            .mount(&server)
            .await;

        let mut h = harness(&server, policy()).await;
        h.controller.access(&CancellationToken::new()).await.unwrap();
        let first_tx = h.controller.current_record().unwrap().transaction_id.clone();
        h.clock.advance(Duration::from_secs(65));
        assert_eq!(h.controller.window_state(), WindowState::Expired);

        let granted = h.controller.access(&CancellationToken::new()).await.unwrap();
        assert_eq!(granted.content, "renewed");
        assert_eq!(
            *h.executor.payees.lock().unwrap(),
            vec!["0xAA".to_string(), "0xstatic".to_string()]
        );
        assert_ne!(granted.transaction_id, Some(first_tx));
    }

    #[tokio::test]
    async fn test_is_propagated_leaves_record_untouched() {
        let server = MockServer::start().await;
        mount_verifier(&server).await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .and(header_exists("x-payment-proof"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(challenge_response())
            .mount(&server)
            .await;

        let mut h = harness(&server, policy()).await;
        h.controller.access(&CancellationToken::new()).await.unwrap();
        let before = h.controller.current_record().cloned();
        let probes = h.probe.calls.load(Ordering::SeqCst);
        for _ in 0..3 {
            assert!(h.controller.is_propagated().await);
        }
        assert_eq!(h.controller.current_record().cloned(), before);
        assert_eq!(h.probe.calls.load(Ordering::SeqCst), probes + 3);
    }

    #[tokio::test]
    async fn test_rejected_verification_exhausts_cycles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verifier/verify"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"verified": false, "error": "unknown tx"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(challenge_response())
            .mount(&server)
            .await;

        let mut h = harness(
            &server,
            AccessPolicy {
                max_retries: 5,
                max_payment_cycles: 2,
                ..policy()
            },
        )
        .await;
        let err = h.controller.access(&CancellationToken::new()).await.unwrap_err();
        match err {
            AccessError::Exhausted { payments, .. } => assert_eq!(payments, 2),
            other => panic!("expected exhaustion, got {other}"),
        }
        assert!(h.controller.current_record().is_none());
    }

    #[tokio::test]
    async fn test_propagation_timeout_is_retried_with_a_new_payment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verifier/verify"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"verified": true})),
            )
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(challenge_response())
            .mount(&server)
            .await;

        let mut h = harness_with(
            &server,
            AccessPolicy {
                max_retries: 1,
                propagation_timeout: Duration::from_secs(10),
                ..policy()
            },
            false,
            |expected, clock| Box::new(SimulatedExecutor::new(expected, clock)),
        )
        .await;
        let err = h.controller.access(&CancellationToken::new()).await.unwrap_err();
        match err {
            AccessError::Exhausted {
                attempts,
                payments,
                reason,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(payments, 2);
                assert!(reason.contains("did not propagate"), "{reason}");
            }
            other => panic!("expected exhaustion, got {other}"),
        }
        assert!(h.controller.current_record().is_none());
        assert_eq!(h.executor.payees.lock().unwrap().len(), 2);
        assert!(h.probe.calls.load(Ordering::SeqCst) >= 2);
        // One retry delay between the two cycles.
        let retry_delays = h
            .clock
            .sleeps()
            .into_iter()
            .filter(|d| *d == Duration::from_secs(1))
            .count();
        assert!(retry_delays >= 1);
    }

    #[tokio::test]
    async fn test_failing_executor_spends_every_payment_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verifier/verify"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"verified": true})),
            )
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(challenge_response())
            .mount(&server)
            .await;

        let mut h = harness_with(
            &server,
            AccessPolicy {
                max_retries: 5,
                max_payment_cycles: 3,
                ..policy()
            },
            true,
            |_, _| Box::new(Refusing),
        )
        .await;
        let err = h.controller.access(&CancellationToken::new()).await.unwrap_err();
        match err {
            AccessError::Exhausted {
                attempts,
                payments,
                reason,
            } => {
                assert_eq!(payments, 3);
                assert_eq!(attempts, 4);
                assert!(reason.contains("3 payment cycles"), "{reason}");
            }
            other => panic!("expected exhaustion, got {other}"),
        }
        assert_eq!(h.executor.payees.lock().unwrap().len(), 3);
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1); 3]);
        assert!(h.controller.current_record().is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_transfer_waits_for_it_and_skips_verification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verifier/verify"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"verified": true})),
            )
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(challenge_response())
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut h = harness_with(&server, policy(), true, move |expected, clock| {
            Box::new(CancelsMidTransfer {
                cancel: token,
                inner: SimulatedExecutor::new(expected, clock),
            })
        })
        .await;
        let err = h.controller.access(&cancel).await.unwrap_err();
        assert!(matches!(err, AccessError::Cancelled), "{err}");
        assert_eq!(*h.executor.payees.lock().unwrap(), vec!["0xAA".to_string()]);
        assert_eq!(h.probe.calls.load(Ordering::SeqCst), 0);
        assert!(h.controller.current_record().is_none());
    }

    #[tokio::test]
    async fn test_other_status_is_retried_then_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut h = harness(&server, policy()).await;
        let err = h.controller.access(&CancellationToken::new()).await.unwrap_err();
        match err {
            AccessError::Exhausted {
                attempts, reason, ..
            } => {
                assert_eq!(attempts, 4);
                assert!(reason.contains("503"), "{reason}");
            }
            other => panic!("expected exhaustion, got {other}"),
        }
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1); 3]);
        assert!(h.executor.payees.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let server = MockServer::start().await;
        let mut h = harness(&server, policy()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = h.controller.access(&cancel).await.unwrap_err();
        assert!(matches!(err, AccessError::Cancelled));
    }

    #[test]
    fn test_proof_headers_from_config() {
        let headers = ProofHeaders::try_from(&ProofHeaderConfig {
            name: "X-Payment-Proof".to_string(),
            aliases: vec![
                "X-Payment-Hash".to_string(),
                "X-Transaction-ID".to_string(),
                "x-payment-proof".to_string(),
            ],
        })
        .unwrap();
        let names: Vec<&str> = headers.names().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["x-payment-proof", "x-payment-hash", "x-transaction-id"]);

        assert!(
            ProofHeaders::try_from(&ProofHeaderConfig {
                name: "bad header".to_string(),
                aliases: vec![],
            })
            .is_err()
        );
    }

    #[test]
    fn test_policy_from_config() {
        let policy = AccessPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_payment_cycles, 3);
        assert_eq!(policy.whitelist_duration, Duration::from_secs(60));
        assert!(policy.allow_degraded);
    }
}
