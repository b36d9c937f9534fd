//! Command line and configuration file loading.
//!
//! The JSON file holds an [`AccessConfig`]. Every field has a default, so a
//! missing default file is not an error: the client runs on defaults plus
//! whatever `--target` names.

use clap::Parser;
use std::path::{Path, PathBuf};
use x402_access_types::config::AccessConfig;

/// CLI arguments for the access client.
#[derive(Parser, Debug)]
#[command(name = "x402-access", version)]
#[command(about = "Fetch a resource behind an x402 paywall, paying when asked")]
pub struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Resource URL, or a domain when a project directory is configured
    #[arg(long, short, env = "TARGET")]
    pub target: Option<String>,

    /// Where to write the fetched content (stdout when omitted)
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("No target: pass --target or set \"target\" in the config file")]
    MissingTarget,
}

/// Everything one run needs.
#[derive(Debug)]
pub struct Config {
    pub access: AccessConfig,
    /// URL or domain, CLI value taking precedence over the file.
    pub target: String,
    pub output: Option<PathBuf>,
}

impl Config {
    /// Parses the process arguments and loads the file they point to.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let access = load_from_path(&args.config)?;
        let target = args
            .target
            .or_else(|| access.target.clone())
            .map(|target| target.trim().to_string())
            .filter(|target| !target.is_empty())
            .ok_or(ConfigError::MissingTarget)?;
        Ok(Config {
            access,
            target,
            output: args.output,
        })
    }
}

fn load_from_path(path: &Path) -> Result<AccessConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            Ok(AccessConfig::default())
        }
        Err(err) => Err(ConfigError::FileRead(path.to_path_buf(), err)),
    }
}
