#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! A `reqwest`-based client for resources behind an x402 paywall.
//!
//! The [`AccessController`] fetches a target. When the server answers
//! `402 Payment Required` with an `X402-Payment` challenge, it pays through a
//! [`PaymentExecutor`], has the proof checked by a [`PaymentVerifier`], waits
//! with an [`AllowlistWaiter`] until the resulting allow-list grant is active,
//! and retries with the proof attached. Grants last a fixed duration; once one
//! lapses, the controller renews it on its own.
//!
//! ## Quickstart
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use x402_access_reqwest::{AccessController, ProjectCredentials, SystemClock};
//! use x402_access_types::config::AccessConfig;
//!
//! let config = AccessConfig::default();
//! let project = ProjectCredentials::from_target_url("https://example.com/articles")?;
//! let mut controller =
//!     AccessController::from_config(&config, &project, "203.0.113.7", Arc::new(SystemClock))?;
//! let granted = controller.access(&CancellationToken::new()).await?;
//! println!("{}", granted.content);
//! ```
//!
//! ## Verification
//!
//! When the verification authority is unreachable, a proof is only checked
//! for its shape. The result is then tagged [`Verification::VerifiedDegraded`]
//! and surfaces in [`AccessGranted::verification`].

pub mod access_server;
pub mod clock;
pub mod controller;
pub mod directory;
pub mod error;
pub mod executor;
pub mod http_transport;
pub mod outcome;
pub mod verifier;
pub mod waiter;

pub use access_server::{AccessServerClient, CheckAccessProbe, resolve_requester_ip};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{AccessController, AccessGranted, AccessPolicy, ProofHeaders};
pub use directory::{DirectoryClient, DirectoryError, ProjectCredentials};
pub use error::{AccessError, SetupError};
pub use executor::{PaymentError, PaymentExecutor, SimulatedExecutor, WalletExecutor};
pub use outcome::{
    AttemptOutcome, ChallengeSource, PaymentDecision, should_trigger_new_payment,
};
pub use verifier::{PaymentVerifier, Verification};
pub use waiter::{AllowlistProbe, AllowlistWaiter, AssumePropagated, BackoffPolicy};
