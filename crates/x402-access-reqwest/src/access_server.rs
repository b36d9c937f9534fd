//! Client of the access server that enforces the allow-list.
//!
//! - `GET /payment-info`: informational payment terms and the requester
//!   address as the server sees it.
//! - `GET /check-access/{address}?resource={scope}`: whether `address` is
//!   allow-listed for `scope`. The scope is always sent, so a grant for one
//!   resource is never mistaken for a grant on another.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;
use x402_access_types::proto::{CheckAccessResponse, IpEchoResponse, PaymentInfo};

use crate::http_transport::{JsonTransport, TransportError, base_url, join};
use crate::waiter::AllowlistProbe;

#[derive(Clone, Debug)]
pub struct AccessServerClient {
    base_url: Url,
    payment_info_url: Url,
    transport: JsonTransport,
}

impl AccessServerClient {
    pub fn try_new(base_url: Url) -> Result<Self, TransportError> {
        let payment_info_url = join(
            &base_url,
            "./payment-info",
            "Failed to construct ./payment-info URL",
        )?;
        Ok(Self {
            base_url,
            payment_info_url,
            transport: JsonTransport::default(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_timeout(timeout);
        self
    }

    #[tracing::instrument(name = "x402.access_server.payment_info", skip_all, err)]
    pub async fn payment_info(&self) -> Result<PaymentInfo, TransportError> {
        self.transport
            .get_json(&self.payment_info_url, "GET /payment-info")
            .await
    }

    /// `GET /check-access/{address}?resource={scope}`.
    #[tracing::instrument(name = "x402.access_server.check_access", skip(self), err)]
    pub async fn check_access(&self, address: &str, scope: &str) -> Result<bool, TransportError> {
        let url = self.check_access_url(address, scope)?;
        let response: CheckAccessResponse =
            self.transport.get_json(&url, "GET /check-access").await?;
        Ok(response.whitelisted)
    }

    fn check_access_url(&self, address: &str, scope: &str) -> Result<Url, TransportError> {
        let mut url = join(
            &self.base_url,
            "./check-access/",
            "Failed to construct ./check-access URL",
        )?;
        url.path_segments_mut()
            .map_err(|_| TransportError::UrlParse {
                context: "Access server URL cannot be a base",
                source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            })?
            .pop_if_empty()
            .push(address);
        url.query_pairs_mut().append_pair("resource", scope);
        Ok(url)
    }

    /// A probe bound to one requester and one resource scope.
    pub fn probe(&self, address: impl Into<String>, scope: impl Into<String>) -> CheckAccessProbe {
        CheckAccessProbe {
            client: self.clone(),
            address: address.into(),
            scope: scope.into(),
        }
    }
}

impl TryFrom<&str> for AccessServerClient {
    type Error = TransportError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        AccessServerClient::try_new(base_url(value, "Failed to parse access server base url")?)
    }
}

/// Allow-list probe backed by `/check-access`.
#[derive(Clone, Debug)]
pub struct CheckAccessProbe {
    client: AccessServerClient,
    address: String,
    scope: String,
}

#[async_trait]
impl AllowlistProbe for CheckAccessProbe {
    async fn is_allowlisted(&self) -> Result<bool, TransportError> {
        self.client.check_access(&self.address, &self.scope).await
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Could not determine the requester address: {reason}")]
pub struct RequesterResolutionError {
    pub reason: String,
}

/// Where a requester address was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterSource {
    Configured,
    PaymentInfo,
    IpEcho,
}

/// Resolves the address payments are bound to.
///
/// Order: the configured value, the address the access server reports in
/// `/payment-info`, then the public IP echo service.
pub async fn resolve_requester_ip(
    configured: Option<&str>,
    access_server: Option<&AccessServerClient>,
    ip_echo_url: &Url,
    transport: &JsonTransport,
) -> Result<(String, RequesterSource), RequesterResolutionError> {
    if let Some(ip) = configured.map(str::trim).filter(|ip| !ip.is_empty()) {
        return Ok((ip.to_string(), RequesterSource::Configured));
    }
    let mut failures = Vec::new();
    if let Some(server) = access_server {
        match server.payment_info().await {
            Ok(PaymentInfo {
                client_ip: Some(ip),
                ..
            }) => return Ok((ip, RequesterSource::PaymentInfo)),
            Ok(_) => failures.push("payment-info has no client address".to_string()),
            Err(err) => failures.push(err.to_string()),
        }
    }
    match transport
        .get_json::<IpEchoResponse>(ip_echo_url, "GET ip echo")
        .await
    {
        Ok(IpEchoResponse { ip }) if !ip.trim().is_empty() => {
            Ok((ip.trim().to_string(), RequesterSource::IpEcho))
        }
        Ok(_) => {
            failures.push("ip echo returned an empty address".to_string());
            Err(RequesterResolutionError {
                reason: failures.join("; "),
            })
        }
        Err(err) => {
            failures.push(err.to_string());
            Err(RequesterResolutionError {
                reason: failures.join("; "),
            })
        }
    }
}
