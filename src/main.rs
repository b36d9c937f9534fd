//! x402 access client.
//!
//! Fetches one resource behind an x402 paywall. On `402 Payment Required` it
//! pays the configured price, has the proof verified, waits for the
//! allow-list grant to become active, and retries with the proof attached.
//! The fetched content goes to `--output` or stdout.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG`, `TARGET` mirror `--config` and `--target`
//! - `RUST_LOG` sets the log filter
//! - `OTEL_*` variables enable span export when built with `telemetry`

use std::process;

use x402_access::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
