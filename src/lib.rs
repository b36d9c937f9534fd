//! Command line front end for [`x402_access_reqwest`].
//!
//! The binary is a thin shell: [`config`] parses arguments and the JSON file,
//! [`run`] resolves the target and drives one
//! [`AccessController`](x402_access_reqwest::AccessController), [`sig_down`]
//! turns SIGINT and SIGTERM into cancellation, and [`telemetry`] installs
//! logging and optional OTLP export.

pub mod config;
pub mod run;
pub mod sig_down;
pub mod telemetry;
