//! One access run: resolve the target, wire a controller, fetch, report.

use dotenvy::dotenv;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;
use x402_access_reqwest::access_server::RequesterResolutionError;
use x402_access_reqwest::http_transport::{JsonTransport, TransportError};
use x402_access_reqwest::{
    AccessController, AccessError, AccessGranted, AccessServerClient, DirectoryClient,
    DirectoryError, ProjectCredentials, SetupError, SystemClock, resolve_requester_ip,
};
use x402_access_types::config::AccessConfig;

use crate::config::{Config, ConfigError};
use crate::sig_down::SigDown;
use crate::telemetry::Telemetry;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),
    #[error("Project lookup failed: {0}")]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Requester(#[from] RequesterResolutionError),
    #[error("Failed to set up the access controller: {0}")]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("Failed to write output to {target}: {source}")]
    Output {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

/// Entry point of the binary.
///
/// Loads `.env`, installs logging, reads the configuration and runs one
/// access to completion. SIGINT or SIGTERM cancels the run between steps.
pub async fn run() -> Result<(), RunError> {
    dotenv().ok();
    let _telemetry = Telemetry::new();

    let config = Config::load()?;
    let sig_down = SigDown::try_new().map_err(RunError::Signal)?;
    let result = access(&config.access, &config.target, &sig_down.cancellation_token()).await;
    sig_down.shutdown().await;

    let granted = result?;
    report(&granted, config.output.as_deref())
}

/// Resolves the project and requester, then drives one controller.
pub async fn access(
    config: &AccessConfig,
    target: &str,
    cancellation_token: &CancellationToken,
) -> Result<AccessGranted, RunError> {
    let project = resolve_project(config, target).await?;
    let access_server = config
        .access_server
        .as_ref()
        .map(|server| {
            AccessServerClient::try_new(server.url.clone())
                .map(|client| client.with_timeout(config.timeouts.fetch))
        })
        .transpose()?;
    let ip_echo_url = Url::parse(&config.ip_echo_url).map_err(|source| TransportError::UrlParse {
        context: "Failed to parse ip echo url",
        source,
    })?;
    let (requester_ip, source) = resolve_requester_ip(
        config.requester_ip.as_deref(),
        access_server.as_ref(),
        &ip_echo_url,
        &JsonTransport::default().with_timeout(config.timeouts.fetch),
    )
    .await?;
    tracing::info!(
        requester_ip = %requester_ip,
        ?source,
        target = %project.target_url,
        has_allowlist_credential = project.allowlist_credential.is_some(),
        "Resolved requester"
    );

    let mut controller =
        AccessController::from_config(config, &project, requester_ip, Arc::new(SystemClock))?;
    Ok(controller.access(cancellation_token).await?)
}

async fn resolve_project(
    config: &AccessConfig,
    target: &str,
) -> Result<ProjectCredentials, RunError> {
    let project = match &config.directory {
        Some(directory) => {
            DirectoryClient::try_new(directory.url.clone())?
                .with_timeout(config.timeouts.fetch)
                .lookup(target)
                .await?
        }
        None => ProjectCredentials::from_target_url(target)?,
    };
    Ok(project)
}

fn report(granted: &AccessGranted, output: Option<&Path>) -> Result<(), RunError> {
    if let Some(verification) = granted.verification.as_ref().filter(|v| v.is_degraded()) {
        tracing::warn!(
            %verification,
            transaction_id = granted.transaction_id.as_ref().map(|tx| tx.short()),
            "Access granted on a proof the verification authority never confirmed"
        );
    }
    tracing::info!(
        status = %granted.status,
        payments = granted.payments,
        bytes = granted.content.len(),
        "Access granted"
    );

    let written = match output {
        Some(path) => std::fs::write(path, &granted.content),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(granted.content.as_bytes())
                .and_then(|()| stdout.flush())
        }
    };
    written.map_err(|source| RunError::Output {
        target: output.map_or_else(|| "stdout".to_string(), |path| path.display().to_string()),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use x402_access_types::config::ServiceConfig;

    fn granted(content: &str) -> AccessGranted {
        AccessGranted {
            content: content.to_string(),
            status: StatusCode::OK,
            payments: 0,
            transaction_id: None,
            verification: None,
        }
    }

    #[test]
    fn test_report_writes_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        report(&granted("<p>paid</p>"), Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<p>paid</p>");
    }

    #[test]
    fn test_report_names_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("page.html");
        let err = report(&granted("x"), Some(&path)).unwrap_err();
        assert!(err.to_string().contains("page.html"), "{err}");
    }

    #[tokio::test]
    async fn test_target_without_directory_must_be_url() {
        let config = AccessConfig {
            directory: None,
            ..AccessConfig::default()
        };
        let err = resolve_project(&config, "not a url").await.unwrap_err();
        assert!(matches!(err, RunError::Directory(_)), "{err}");
    }

    #[tokio::test]
    async fn test_malformed_ip_echo_url_is_reported() {
        let config = AccessConfig {
            directory: None,
            requester_ip: None,
            access_server: None,
            ip_echo_url: "not a url".to_string(),
            ..AccessConfig::default()
        };
        let token = CancellationToken::new();
        let err = access(&config, "https://news.example/a", &token)
            .await
            .unwrap_err();
        assert!(
            matches!(err, RunError::Transport(TransportError::UrlParse { .. })),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_unreachable_directory_is_reported() {
        let config = AccessConfig {
            directory: Some(ServiceConfig {
                url: "http://127.0.0.1:1/".parse().unwrap(),
            }),
            ..AccessConfig::default()
        };
        let err = resolve_project(&config, "news.example").await.unwrap_err();
        assert!(
            matches!(err, RunError::Directory(DirectoryError::Transport(_))),
            "{err}"
        );
    }
}
