//! Waiting for an allow-list grant to take effect.
//!
//! Propagation to the enforcement point is known to take a nonzero minimum
//! time, so [`AllowlistWaiter::wait`] first sleeps a floor delay, then polls
//! its [`AllowlistProbe`] with a multiplicatively growing, capped interval
//! until the probe reports success or the timeout elapses.
//!
//! All sleeping goes through the injected [`Clock`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use x402_access_types::config::PropagationConfig;

use crate::clock::Clock;
use crate::http_transport::TransportError;

/// Answers whether the requester is allow-listed yet.
#[async_trait]
pub trait AllowlistProbe: Send + Sync {
    async fn is_allowlisted(&self) -> Result<bool, TransportError>;
}

/// Probe for setups without an access server: the grant is assumed active once the floor delay has passed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumePropagated;

#[async_trait]
impl AllowlistProbe for AssumePropagated {
    async fn is_allowlisted(&self) -> Result<bool, TransportError> {
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("Backoff multiplier must be a finite number >= 1, got {0}")]
    Multiplier(f64),
    #[error("Initial poll interval must be greater than zero")]
    ZeroInterval,
    #[error("Maximum poll interval {max:?} is shorter than the initial interval {initial:?}")]
    MaxBelowInitial { initial: Duration, max: Duration },
}

/// Poll schedule: floor delay, then `initial_interval * multiplier^n` capped at `max_interval`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    floor: Duration,
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
}

impl BackoffPolicy {
    pub fn new(
        floor: Duration,
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
    ) -> Result<Self, BackoffError> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BackoffError::Multiplier(multiplier));
        }
        if initial_interval.is_zero() {
            return Err(BackoffError::ZeroInterval);
        }
        if max_interval < initial_interval {
            return Err(BackoffError::MaxBelowInitial {
                initial: initial_interval,
                max: max_interval,
            });
        }
        Ok(Self {
            floor,
            initial_interval,
            multiplier,
            max_interval,
        })
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    /// The interval following `current`, rounded to whole milliseconds.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let millis = (current.as_millis() as f64 * self.multiplier).round() as u64;
        Duration::from_millis(millis).min(self.max_interval)
    }
}

impl TryFrom<&PropagationConfig> for BackoffPolicy {
    type Error = BackoffError;

    fn try_from(config: &PropagationConfig) -> Result<Self, Self::Error> {
        BackoffPolicy::new(
            config.floor,
            config.initial_interval,
            config.multiplier,
            config.max_interval,
        )
    }
}

pub struct AllowlistWaiter {
    policy: BackoffPolicy,
    probe: Arc<dyn AllowlistProbe>,
    clock: Arc<dyn Clock>,
}

impl AllowlistWaiter {
    pub fn new(policy: BackoffPolicy, probe: Arc<dyn AllowlistProbe>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            probe,
            clock,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// One probe call. A failing probe reads as "not yet".
    pub async fn check(&self) -> bool {
        match self.probe.is_allowlisted().await {
            Ok(allowlisted) => allowlisted,
            Err(err) => {
                tracing::debug!(error = %err, "Allow-list probe failed");
                false
            }
        }
    }

    /// Waits until the probe succeeds. Returns `false` once `timeout` has elapsed.
    #[tracing::instrument(name = "x402.waiter.wait", skip(self))]
    pub async fn wait(&self, timeout: Duration) -> bool {
        let started = self.clock.now();
        self.clock.sleep(self.policy.floor.min(timeout)).await;
        let mut interval = self.policy.initial_interval;
        let mut polls = 0u32;
        loop {
            polls += 1;
            if self.check().await {
                tracing::info!(polls, "Allow-list grant is active");
                return true;
            }
            let elapsed = self.clock.now().saturating_since(started);
            if elapsed >= timeout {
                tracing::warn!(polls, ?elapsed, "Allow-list grant did not propagate in time");
                return false;
            }
            self.clock.sleep(interval.min(timeout - elapsed)).await;
            interval = self.policy.next_interval(interval);
        }
    }
}
