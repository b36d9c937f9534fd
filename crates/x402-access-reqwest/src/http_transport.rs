//! Shared JSON-over-HTTP plumbing for the external collaborators.
//!
//! The verifier, the access server, the project directory and the wallet
//! service all speak plain JSON. [`JsonTransport`] carries the `reqwest`
//! client, the headers and the timeout for one collaborator, and maps every
//! failure into a [`TransportError`] tagged with a human-readable context such
//! as `"POST /verify"`.

use http::{HeaderMap, HeaderValue, StatusCode, header};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;
use x402_access_types::config::Secret;

/// Errors that can occur while talking to a JSON collaborator.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid header value: {context}")]
    InvalidHeader {
        context: &'static str,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// The collaborator could not be reached at all: refused connection, DNS failure, timeout.
    pub fn is_unreachable(&self) -> bool {
        match self {
            TransportError::Http { source, .. } => source.is_connect() || source.is_timeout(),
            _ => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// JSON client bound to one collaborator's headers and timeout.
#[derive(Clone, Debug)]
pub struct JsonTransport {
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl Default for JsonTransport {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl JsonTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches custom headers to all future requests.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sends `Authorization: Bearer <secret>` with every request.
    ///
    /// The header is marked sensitive so it is left out of `Debug` output.
    pub fn with_bearer(mut self, secret: &Secret) -> Result<Self, TransportError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", secret.expose())).map_err(
            |source| TransportError::InvalidHeader {
                context: "Authorization bearer credential",
                source,
            },
        )?;
        value.set_sensitive(true);
        self.headers.insert(header::AUTHORIZATION, value);
        Ok(self)
    }

    /// Generic POST helper: serializes `payload`, applies headers and timeout, decodes a 200 body.
    ///
    /// `context` is a human-readable identifier used in tracing and error messages (e.g. `"POST /verify"`).
    pub async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, TransportError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.prepare(self.client.post(url.clone()).json(payload));
        self.execute(request, context).await
    }

    /// Generic GET helper, see [`JsonTransport::post_json`].
    pub async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, TransportError>
    where
        R: DeserializeOwned,
    {
        let request = self.prepare(self.client.get(url.clone()));
        self.execute(request, context).await
    }

    fn prepare(&self, mut request: RequestBuilder) -> RequestBuilder {
        for (key, value) in self.headers.iter() {
            request = request.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        request
    }

    async fn execute<R>(
        &self,
        request: RequestBuilder,
        context: &'static str,
    ) -> Result<R, TransportError>
    where
        R: DeserializeOwned,
    {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http { context, source: e })?;
        let result = read_json(response, context).await;
        if let Err(err) = &result {
            tracing::debug!(error = %err, context, "Request to collaborator failed");
        }
        result
    }
}

async fn read_json<R>(response: Response, context: &'static str) -> Result<R, TransportError>
where
    R: DeserializeOwned,
{
    if response.status() == StatusCode::OK {
        response
            .json::<R>()
            .await
            .map_err(|e| TransportError::JsonDeserialization { context, source: e })
    } else {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::ResponseBodyRead { context, source: e })?;
        Err(TransportError::HttpStatus {
            context,
            status,
            body,
        })
    }
}

/// Parses a base URL, normalizing it to exactly one trailing slash so relative joins
/// append to the path instead of replacing its last segment.
pub fn base_url(value: &str, context: &'static str) -> Result<Url, TransportError> {
    let mut normalized = value.trim_end_matches('/').to_string();
    normalized.push('/');
    Url::parse(&normalized).map_err(|source| TransportError::UrlParse { context, source })
}

/// Joins `path` onto a base URL, normalizing the base first.
pub fn join(base: &Url, path: &str, context: &'static str) -> Result<Url, TransportError> {
    base_url(base.as_str(), context)?
        .join(path)
        .map_err(|source| TransportError::UrlParse { context, source })
}
