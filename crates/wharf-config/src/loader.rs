//! Configuration file loading with environment overrides.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;
use crate::model::WharfConfig;

/// Environment variable naming the configuration file path.
pub const CONFIG_PATH_ENV: &str = "WHARF_CONFIG";
/// Environment variable overriding the Provider API token.
const API_TOKEN_ENV: &str = "WHARF_API_TOKEN";
/// Fallback configuration path relative to the working directory.
const DEFAULT_CONFIG_FILE: &str = "wharf.yaml";

/// Resolve the configuration path from the environment, falling back to
/// `wharf.yaml` in the working directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
}

/// Load and validate the configuration from the default path.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn load() -> Result<WharfConfig, ConfigError> {
    load_from_path(&default_config_path())
}

/// Load and validate the configuration from an explicit path.
///
/// The `WHARF_API_TOKEN` environment variable, when set and non-empty,
/// replaces the token from the document before validation runs.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn load_from_path(path: &Path) -> Result<WharfConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::io("config.read", path, source))?;
    let mut config: WharfConfig =
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    if let Ok(token) = std::env::var(API_TOKEN_ENV)
        && !token.trim().is_empty()
    {
        debug!(variable = API_TOKEN_ENV, "using API token from environment");
        config.provider.api_token = token;
    }

    crate::validate::validate(&config)?;
    Ok(config)
}
