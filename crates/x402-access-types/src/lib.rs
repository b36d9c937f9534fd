#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for x402 pay-to-access clients.
//!
//! A protected resource answers an unpaid request with `402 Payment Required`
//! and its payment terms. The client pays, has the payment verified, waits for
//! the resulting allow-list grant to propagate, and retries. The grant lasts a
//! fixed duration, after which the cycle repeats.
//!
//! This crate holds the transport-agnostic part of that flow. The HTTP side
//! lives in `x402-access-reqwest`.
//!
//! # Modules
//!
//! - [`challenge`] - Detecting x402 refusals and validating their payment terms
//! - [`config`] - Client configuration and environment variable resolution
//! - [`money_amount`] - Decimal amounts and the accepted currency
//! - [`proto`] - Wire format of the verifier, access server, directory and wallet
//! - [`record`] - Payment records and the access windows they open
//! - [`timestamp`] - Millisecond Unix timestamps
//! - [`transaction`] - Transaction identifiers

pub mod challenge;
pub mod config;
pub mod money_amount;
pub mod proto;
pub mod record;
pub mod timestamp;
pub mod transaction;
