//! Resolving a human identifier into a target and its allow-list credentials.
//!
//! Consumed once, before the access loop starts.

use std::fmt;
use std::time::Duration;
use url::Url;
use x402_access_types::proto::ProjectLookupResponse;

use crate::http_transport::{JsonTransport, TransportError, base_url, join};

/// What the access loop needs to know about a target.
#[derive(Clone, PartialEq, Eq)]
pub struct ProjectCredentials {
    pub target_url: Url,
    /// Scope sent as `resource` on allow-list checks.
    pub allowlist_scope_id: String,
    /// Key the directory issues for managing the allow-list. Handed to the
    /// caller as-is; no request made here ever carries it.
    pub allowlist_credential: Option<String>,
}

impl fmt::Debug for ProjectCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectCredentials")
            .field("target_url", &self.target_url.as_str())
            .field("allowlist_scope_id", &self.allowlist_scope_id)
            .field(
                "allowlist_credential",
                &self.allowlist_credential.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl ProjectCredentials {
    /// Credentials derived from the target URL alone: the host is the scope.
    pub fn from_target_url(target: &str) -> Result<Self, DirectoryError> {
        let target_url = Url::parse(target.trim()).map_err(|source| DirectoryError::InvalidTarget {
            target: target.to_string(),
            source,
        })?;
        let host = target_url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| DirectoryError::MissingField("host"))?
            .to_string();
        Ok(Self {
            target_url,
            allowlist_scope_id: host,
            allowlist_credential: None,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("No project registered for {0}")]
    NotFound(String),
    #[error("Directory rejected the lookup: {0}")]
    Rejected(String),
    #[error("Project record is missing {0}")]
    MissingField(&'static str),
    #[error("Invalid target {target:?}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone, Debug)]
pub struct DirectoryClient {
    lookup_url: Url,
    transport: JsonTransport,
}

impl DirectoryClient {
    pub fn try_new(base_url: Url) -> Result<Self, TransportError> {
        let lookup_url = join(
            &base_url,
            "./api/projects/public",
            "Failed to construct ./api/projects/public URL",
        )?;
        Ok(Self {
            lookup_url,
            transport: JsonTransport::default(),
        })
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = self.transport.with_timeout(timeout);
        self
    }

    /// Looks up a domain or URL. A URL is reduced to its host first.
    #[tracing::instrument(name = "x402.directory.lookup", skip(self), err)]
    pub async fn lookup(&self, identifier: &str) -> Result<ProjectCredentials, DirectoryError> {
        let domain = domain_of(identifier);
        let mut url = self.lookup_url.clone();
        url.query_pairs_mut().append_pair("domain", &domain);

        let response: ProjectLookupResponse =
            match self.transport.get_json(&url, "GET /api/projects/public").await {
                Ok(response) => response,
                Err(err) if err.status() == Some(http::StatusCode::NOT_FOUND) => {
                    return Err(DirectoryError::NotFound(domain));
                }
                Err(err) => return Err(err.into()),
            };
        if !response.success {
            return Err(DirectoryError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "lookup was not successful".to_string()),
            ));
        }
        let project = response.project.ok_or(DirectoryError::NotFound(domain))?;
        let website_url = project
            .website_url
            .filter(|u| !u.trim().is_empty())
            .ok_or(DirectoryError::MissingField("websiteUrl"))?;
        let target_url =
            Url::parse(website_url.trim()).map_err(|source| DirectoryError::InvalidTarget {
                target: website_url.clone(),
                source,
            })?;
        let allowlist_scope_id = project
            .zone_id
            .filter(|z| !z.trim().is_empty())
            .ok_or(DirectoryError::MissingField("zoneId"))?;
        let credentials = ProjectCredentials {
            target_url,
            allowlist_scope_id,
            allowlist_credential: project.secret_key.filter(|k| !k.is_empty()),
        };
        tracing::info!(?credentials, "Resolved project");
        Ok(credentials)
    }
}

impl TryFrom<&str> for DirectoryClient {
    type Error = TransportError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        DirectoryClient::try_new(base_url(value, "Failed to parse directory base url")?)
    }
}

/// `https://www.example.com/path` and `www.example.com` both give `www.example.com`.
pub fn domain_of(identifier: &str) -> String {
    let trimmed = identifier.trim();
    Url::parse(trimmed)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| {
            trimmed
                .split(['/', '?', '#'])
                .next()
                .unwrap_or(trimmed)
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://www.example.com/a?b=c"), "www.example.com");
        assert_eq!(domain_of("example.com"), "example.com");
        assert_eq!(domain_of(" example.com/articles "), "example.com");
    }

    #[test]
    fn test_target_url_scope_is_host() {
        let credentials = ProjectCredentials::from_target_url("https://example.com/paid").unwrap();
        assert_eq!(credentials.allowlist_scope_id, "example.com");
        assert!(ProjectCredentials::from_target_url("example.com").is_err());
    }

    #[tokio::test]
    async fn test_lookup_resolves_project() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/projects/public"))
            .and(query_param("domain", "example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "project": {
                    "websiteUrl": "https://example.com/articles",
                    "zoneId": "zone-42",
                    "secretKey": "very-secret"
                }
            })))
            .mount(&server)
            .await;

        let client = DirectoryClient::try_from(server.uri().as_str()).unwrap();
        let credentials = client.lookup("https://example.com/whatever").await.unwrap();
        assert_eq!(credentials.target_url.as_str(), "https://example.com/articles");
        assert_eq!(credentials.allowlist_scope_id, "zone-42");
        assert_eq!(credentials.allowlist_credential.as_deref(), Some("very-secret"));
        assert!(!format!("{credentials:?}").contains("very-secret"));
    }

    #[tokio::test]
    async fn test_lookup_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("domain", "missing.com"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("domain", "refused.com"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "error": "inactive project"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("domain", "partial.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "project": {"websiteUrl": "https://partial.com"}
            })))
            .mount(&server)
            .await;

        let client = DirectoryClient::try_from(server.uri().as_str()).unwrap();
        assert!(matches!(
            client.lookup("missing.com").await,
            Err(DirectoryError::NotFound(domain)) if domain == "missing.com"
        ));
        assert!(matches!(
            client.lookup("refused.com").await,
            Err(DirectoryError::Rejected(reason)) if reason == "inactive project"
        ));
        assert!(matches!(
            client.lookup("partial.com").await,
            Err(DirectoryError::MissingField("zoneId"))
        ));
    }
}
