//! Configuration model for an x402 access client.
//!
//! Every knob the access loop consumes is a plain value in [`AccessConfig`],
//! threaded into each component at construction time. Nothing is read from
//! global state after loading, so several controllers with different settings
//! can run side by side.
//!
//! # Environment Variable Resolution
//!
//! Secrets are wrapped in [`LiteralOrEnv`], which resolves `"$VAR"` and
//! `"${VAR}"` references while deserializing:
//!
//! ```json
//! {
//!   "executor": {
//!     "type": "wallet",
//!     "url": "http://localhost:8700/",
//!     "api_key": "$WALLET_API_KEY"
//!   }
//! }
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, DurationMilliSeconds, DurationSeconds, serde_as};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::challenge::ExpectedPayment;
use crate::money_amount::{Currency, MoneyAmount};

// ============================================================================
// Environment Variable Resolution
// ============================================================================

/// A transparent wrapper that resolves environment variables during deserialization.
///
/// Supports both literal values and environment variable references:
/// - Literal: `"sk_live_…"`
/// - Simple env var: `"$WALLET_API_KEY"`
/// - Braced env var: `"${WALLET_API_KEY}"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the variable name if the string matches `$VAR` or `${VAR}` syntax.
    fn parse_env_var_syntax(s: &str) -> Option<&str> {
        if let Some(braced) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            Some(braced)
        } else {
            s.strip_prefix('$').filter(|name| {
                !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
            })
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = match Self::parse_env_var_syntax(&s) {
            Some(var_name) => std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{var_name}' not found (referenced as '{s}')"
                ))
            })?,
            None => s,
        };
        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {e}")))?;
        Ok(LiteralOrEnv(parsed))
    }
}

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl FromStr for Secret {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Secret::new(s))
    }
}

// ============================================================================
// Access configuration
// ============================================================================

/// Complete configuration of one access client.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// URL or domain of the protected resource. The CLI may override it.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub propagation: PropagationConfig,
    #[serde(default)]
    pub proof_header: ProofHeaderConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    /// Access server publishing `/payment-info` and `/check-access`.
    #[serde(default = "config_defaults::access_server")]
    pub access_server: Option<ServiceConfig>,
    /// Project directory resolving domains to allow-list credentials.
    #[serde(default = "config_defaults::directory")]
    pub directory: Option<ServiceConfig>,
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Requester address used to bind payment proofs; detected when absent.
    #[serde(default = "config_defaults::requester_ip")]
    pub requester_ip: Option<String>,
    /// Public IP echo service answering `{"ip": "..."}`.
    #[serde(default = "config_defaults::ip_echo_url")]
    pub ip_echo_url: String,
    #[serde(default = "config_defaults::user_agent")]
    pub user_agent: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        AccessConfig {
            target: None,
            payment: PaymentConfig::default(),
            timeouts: TimeoutsConfig::default(),
            retry: RetryConfig::default(),
            propagation: PropagationConfig::default(),
            proof_header: ProofHeaderConfig::default(),
            verifier: VerifierConfig::default(),
            access_server: config_defaults::access_server(),
            directory: config_defaults::directory(),
            executor: ExecutorConfig::default(),
            requester_ip: config_defaults::requester_ip(),
            ip_echo_url: config_defaults::ip_echo_url(),
            user_agent: config_defaults::user_agent(),
        }
    }
}

impl AccessConfig {
    pub fn expected_payment(&self) -> ExpectedPayment {
        ExpectedPayment {
            amount: self.payment.amount,
            currency: self.payment.currency,
        }
    }
}

/// The configured price and the duration of the allow-list grant it buys.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfig {
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "config_defaults::amount")]
    pub amount: MoneyAmount,
    #[serde(default)]
    pub currency: Currency,
    /// Static payee used when renewing an expired window without a fresh challenge.
    #[serde(default)]
    pub address: Option<String>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        rename = "whitelist_duration_secs",
        default = "config_defaults::whitelist_duration"
    )]
    pub whitelist_duration: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        PaymentConfig {
            amount: config_defaults::amount(),
            currency: Currency::default(),
            address: None,
            whitelist_duration: config_defaults::whitelist_duration(),
        }
    }
}

/// Independent timeouts of the three blocking steps.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "fetch_secs", default = "config_defaults::step_timeout")]
    pub fetch: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "verify_secs", default = "config_defaults::step_timeout")]
    pub verify: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "propagation_secs", default = "config_defaults::step_timeout")]
    pub propagation: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        TimeoutsConfig {
            fetch: config_defaults::step_timeout(),
            verify: config_defaults::step_timeout(),
            propagation: config_defaults::step_timeout(),
        }
    }
}

/// Bounds of the outer attempt loop.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Failed rounds tolerated before giving up.
    #[serde(default = "config_defaults::max_retries")]
    pub max_retries: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "delay_secs", default = "config_defaults::retry_delay")]
    pub delay: Duration,
    /// Payment cycles allowed within one access call.
    #[serde(default = "config_defaults::max_payment_cycles")]
    pub max_payment_cycles: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: config_defaults::max_retries(),
            delay: config_defaults::retry_delay(),
            max_payment_cycles: config_defaults::max_payment_cycles(),
        }
    }
}

/// Poll schedule of the allow-list waiter.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Propagation is never observed before this much time has passed.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "floor_ms", default = "config_defaults::propagation_floor")]
    pub floor: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(
        rename = "initial_interval_ms",
        default = "config_defaults::propagation_initial_interval"
    )]
    pub initial_interval: Duration,
    #[serde(default = "config_defaults::propagation_multiplier")]
    pub multiplier: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(
        rename = "max_interval_ms",
        default = "config_defaults::propagation_max_interval"
    )]
    pub max_interval: Duration,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        PropagationConfig {
            floor: config_defaults::propagation_floor(),
            initial_interval: config_defaults::propagation_initial_interval(),
            multiplier: config_defaults::propagation_multiplier(),
            max_interval: config_defaults::propagation_max_interval(),
        }
    }
}

/// Header carrying the transaction id on retried requests.
///
/// `name` is the canonical header. Some servers only look at other names, so
/// every alias is sent as well, with the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofHeaderConfig {
    #[serde(default = "config_defaults::proof_header_name")]
    pub name: String,
    #[serde(default = "config_defaults::proof_header_aliases")]
    pub aliases: Vec<String>,
}

impl Default for ProofHeaderConfig {
    fn default() -> Self {
        ProofHeaderConfig {
            name: config_defaults::proof_header_name(),
            aliases: config_defaults::proof_header_aliases(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Base URL; `verify` is resolved relative to it. Parsed when the verifier is built.
    #[serde(default = "config_defaults::verifier_url")]
    pub url: String,
    /// Accept a structural check of the transaction id when the authority is unreachable.
    #[serde(default = "config_defaults::allow_degraded")]
    pub allow_degraded: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        VerifierConfig {
            url: config_defaults::verifier_url(),
            allow_degraded: config_defaults::allow_degraded(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub url: Url,
}

/// Which payment executor performs transfers.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// No funds move; emits well-formed transaction ids. For development and tests.
    #[default]
    Simulated,
    /// Delegates signing and broadcast to an external wallet service.
    Wallet {
        url: Url,
        api_key: LiteralOrEnv<Secret>,
        #[serde_as(as = "DurationSeconds<u64>")]
        #[serde(rename = "timeout_secs", default = "config_defaults::wallet_timeout")]
        timeout: Duration,
    },
}

pub mod config_defaults {
    use super::*;
    use std::env;

    pub const DEFAULT_AMOUNT: &str = "0.01";
    pub const DEFAULT_WHITELIST_DURATION_SECS: u64 = 60;
    pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
    pub const DEFAULT_MAX_PAYMENT_CYCLES: u32 = 3;
    pub const DEFAULT_PROOF_HEADER: &str = "X-Payment-Proof";
    pub const DEFAULT_VERIFIER_URL: &str = "http://localhost:3000/api/x402-payment/";
    pub const DEFAULT_IP_ECHO_URL: &str = "https://api.ipify.org/?format=json";
    pub const DEFAULT_USER_AGENT: &str = concat!("x402-access/", env!("CARGO_PKG_VERSION"));

    pub fn amount() -> MoneyAmount {
        MoneyAmount::parse(DEFAULT_AMOUNT).unwrap_or(MoneyAmount(Decimal::new(1, 2)))
    }

    pub fn whitelist_duration() -> Duration {
        Duration::from_secs(DEFAULT_WHITELIST_DURATION_SECS)
    }

    pub fn step_timeout() -> Duration {
        Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS)
    }

    pub fn max_retries() -> u32 {
        DEFAULT_MAX_RETRIES
    }

    pub fn retry_delay() -> Duration {
        Duration::from_secs(DEFAULT_RETRY_DELAY_SECS)
    }

    pub fn max_payment_cycles() -> u32 {
        DEFAULT_MAX_PAYMENT_CYCLES
    }

    pub fn propagation_floor() -> Duration {
        Duration::from_secs(5)
    }

    pub fn propagation_initial_interval() -> Duration {
        Duration::from_secs(2)
    }

    pub fn propagation_multiplier() -> f64 {
        1.2
    }

    pub fn propagation_max_interval() -> Duration {
        Duration::from_secs(5)
    }

    pub fn proof_header_name() -> String {
        DEFAULT_PROOF_HEADER.to_string()
    }

    pub fn proof_header_aliases() -> Vec<String> {
        vec!["X-Payment-Hash".to_string()]
    }

    /// Returns the verifier URL with fallback: $BOT_PAYMENT_SYSTEM_URL -> localhost default.
    pub fn verifier_url() -> String {
        env::var("BOT_PAYMENT_SYSTEM_URL")
            .ok()
            .filter(|s| Url::parse(s).is_ok())
            .unwrap_or_else(|| DEFAULT_VERIFIER_URL.to_string())
    }

    pub fn allow_degraded() -> bool {
        true
    }

    /// Access server from $ACCESS_SERVER_URL, if set.
    pub fn access_server() -> Option<ServiceConfig> {
        service_from_env("ACCESS_SERVER_URL")
    }

    /// Project directory from $MAIN_APP_URL, if set.
    pub fn directory() -> Option<ServiceConfig> {
        service_from_env("MAIN_APP_URL")
    }

    /// Requester address from $CLIENT_IP, if set.
    pub fn requester_ip() -> Option<String> {
        env::var("CLIENT_IP").ok().filter(|ip| !ip.trim().is_empty())
    }

    pub fn ip_echo_url() -> String {
        DEFAULT_IP_ECHO_URL.to_string()
    }

    pub fn user_agent() -> String {
        DEFAULT_USER_AGENT.to_string()
    }

    pub fn wallet_timeout() -> Duration {
        Duration::from_secs(120)
    }

    fn service_from_env(var: &str) -> Option<ServiceConfig> {
        env::var(var)
            .ok()
            .and_then(|s| Url::parse(&s).ok())
            .map(|url| ServiceConfig { url })
    }
}
