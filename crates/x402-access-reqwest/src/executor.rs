//! Payment execution: the capability that moves funds and returns a proof.
//!
//! The controller only relies on the [`PaymentExecutor`] contract: the amount
//! is checked against the single configured price, the call returns once the
//! transfer is done, and the returned [`PaymentRecord`] is stamped with the
//! clock's time at that moment. How the transfer is signed and broadcast is
//! up to the adapter.
//!
//! - [`SimulatedExecutor`] moves nothing and emits well-formed transaction ids.
//! - [`WalletExecutor`] delegates to an external wallet service over HTTP.
//!   Its credential comes from configuration only.

use async_trait::async_trait;
use rand::{Rng, rng};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use x402_access_types::challenge::ExpectedPayment;
use x402_access_types::config::{ExecutorConfig, Secret};
use x402_access_types::money_amount::MoneyAmount;
use x402_access_types::proto::{TransferRequest, TransferResponse};
use x402_access_types::record::PaymentRecord;
use x402_access_types::transaction::TransactionId;

use crate::clock::Clock;
use crate::http_transport::{JsonTransport, TransportError, join};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Refusing to pay {found}, the configured price is {expected}")]
    AmountMismatch {
        expected: MoneyAmount,
        found: MoneyAmount,
    },
    #[error("Payment address is empty")]
    EmptyAddress,
    #[error("Amount {0} cannot be expressed in base units")]
    UnrepresentableAmount(MoneyAmount),
    #[error("Wallet service refused the transfer: {0}")]
    Refused(String),
    #[error("Wallet service returned no transaction id")]
    MissingTransactionId,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[async_trait]
pub trait PaymentExecutor: Send + Sync {
    /// Transfers `amount` to `address` and returns the record of the completed payment.
    async fn execute(
        &self,
        address: &str,
        amount: &MoneyAmount,
    ) -> Result<PaymentRecord, PaymentError>;
}

#[async_trait]
impl<T: PaymentExecutor + ?Sized> PaymentExecutor for Arc<T> {
    async fn execute(
        &self,
        address: &str,
        amount: &MoneyAmount,
    ) -> Result<PaymentRecord, PaymentError> {
        (**self).execute(address, amount).await
    }
}

/// Builds the executor selected in configuration.
pub fn from_config(
    config: &ExecutorConfig,
    expected: ExpectedPayment,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn PaymentExecutor>, PaymentError> {
    match config {
        ExecutorConfig::Simulated => Ok(Arc::new(SimulatedExecutor::new(expected, clock))),
        ExecutorConfig::Wallet {
            url,
            api_key,
            timeout,
        } => {
            let executor = WalletExecutor::try_new(url, api_key, *timeout, expected, clock)?;
            Ok(Arc::new(executor))
        }
    }
}

fn check_terms(
    expected: &ExpectedPayment,
    address: &str,
    amount: &MoneyAmount,
) -> Result<(), PaymentError> {
    if *amount != expected.amount {
        return Err(PaymentError::AmountMismatch {
            expected: expected.amount,
            found: *amount,
        });
    }
    if address.trim().is_empty() {
        return Err(PaymentError::EmptyAddress);
    }
    Ok(())
}

/// Pretends to pay. Produces `0x` + 64 random hex digits.
pub struct SimulatedExecutor {
    expected: ExpectedPayment,
    clock: Arc<dyn Clock>,
}

impl SimulatedExecutor {
    pub fn new(expected: ExpectedPayment, clock: Arc<dyn Clock>) -> Self {
        Self { expected, clock }
    }
}

#[async_trait]
impl PaymentExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        address: &str,
        amount: &MoneyAmount,
    ) -> Result<PaymentRecord, PaymentError> {
        check_terms(&self.expected, address, amount)?;
        let hash: [u8; 32] = rng().random();
        let transaction_id = TransactionId::from_hash(hash);
        tracing::info!(
            tx = transaction_id.short(),
            %amount,
            currency = %self.expected.currency,
            "Simulated payment"
        );
        Ok(PaymentRecord {
            transaction_id,
            address: address.trim().to_string(),
            amount: *amount,
            created_at: self.clock.now(),
        })
    }
}

/// Delegates the transfer to an external wallet service: `POST {url}/transfer`.
pub struct WalletExecutor {
    transfer_url: Url,
    transport: JsonTransport,
    expected: ExpectedPayment,
    clock: Arc<dyn Clock>,
}

impl WalletExecutor {
    pub fn try_new(
        base_url: &Url,
        api_key: &Secret,
        timeout: Duration,
        expected: ExpectedPayment,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PaymentError> {
        let transfer_url = join(base_url, "./transfer", "Failed to construct ./transfer URL")?;
        let transport = JsonTransport::default()
            .with_timeout(timeout)
            .with_bearer(api_key)?;
        Ok(Self {
            transfer_url,
            transport,
            expected,
            clock,
        })
    }

    pub fn transfer_url(&self) -> &Url {
        &self.transfer_url
    }
}

#[async_trait]
impl PaymentExecutor for WalletExecutor {
    #[tracing::instrument(name = "x402.executor.wallet", skip_all, fields(to = %address), err)]
    async fn execute(
        &self,
        address: &str,
        amount: &MoneyAmount,
    ) -> Result<PaymentRecord, PaymentError> {
        check_terms(&self.expected, address, amount)?;
        let currency = self.expected.currency;
        let amount_base_units = amount
            .as_base_units(currency.decimals())
            .and_then(|units| u64::try_from(units).ok())
            .ok_or(PaymentError::UnrepresentableAmount(*amount))?;
        let request = TransferRequest {
            to: address.trim().to_string(),
            amount: amount.0,
            amount_base_units,
            currency,
        };
        let response: TransferResponse = self
            .transport
            .post_json(&self.transfer_url, "POST /transfer", &request)
            .await?;
        let transaction_id = match (response.transaction_id, response.error) {
            (Some(transaction_id), _) => transaction_id,
            (None, Some(error)) => return Err(PaymentError::Refused(error)),
            (None, None) => return Err(PaymentError::MissingTransactionId),
        };
        tracing::info!(tx = transaction_id.short(), %amount, %currency, "Wallet payment completed");
        Ok(PaymentRecord {
            transaction_id,
            address: request.to,
            amount: *amount,
            created_at: self.clock.now(),
        })
    }
}
