//! Runtime configuration
//!
//! Settings come from command-line flags, falling back to environment
//! variables, which may themselves come from a `.env` file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::cli::Args;
use crate::router::{ArrisConfig, RetryPolicy};

const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("Failed to load env file {}: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
}

/// Everything the controller needs to run
#[derive(Debug, Clone)]
pub struct Config {
    /// Router device name the forwards point at
    pub device_name: String,
    pub router: ArrisConfig,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let device_name = required(&args.device_name, "K8S_HOST")?;
        let base_url = required(&args.router_base, "ROUTER_BASE")?;
        let username = required(&args.router_admin, "ROUTER_ADMIN")?;
        let password = required(&args.router_pass, "ROUTER_PASS")?;

        let router = ArrisConfig::new(base_url, username, password)
            .with_request_timeout(Duration::from_secs(args.request_timeout))
            .with_session_ttl(Duration::from_secs(args.session_ttl))
            .with_existing_rule(args.existing_rule)
            .with_missing_rule(args.missing_rule);

        Ok(Self {
            device_name,
            router,
            retry: RetryPolicy::default().with_max_attempts(args.retry_attempts),
        })
    }
}

fn required(value: &Option<String>, variable: &'static str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing(variable))
}

/// Load environment variables from `path`, or from `./.env` when no path
/// is given. A missing default file is not an error; a missing explicit
/// one is. Variables already set in the environment win.
///
/// Returns the file that was loaded, if any.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_ENV_FILE), false),
    };

    if !explicit && !path.exists() {
        return Ok(None);
    }

    dotenvy::from_path(&path).map_err(|source| ConfigError::EnvFile {
        path: path.clone(),
        source,
    })?;
    Ok(Some(path))
}
