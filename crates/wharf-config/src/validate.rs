//! Validation rules applied to a loaded configuration document.

use crate::error::ConfigError;
use crate::model::WharfConfig;

/// Validate a configuration document before the daemon starts.
///
/// # Errors
///
/// Returns a [`ConfigError::InvalidField`] describing the first violated
/// rule.
pub fn validate(config: &WharfConfig) -> Result<(), ConfigError> {
    if config.provider.api_base.trim().is_empty() {
        return Err(ConfigError::invalid("provider", "api_base", "empty", None));
    }
    if config.provider.api_token.trim().is_empty() {
        return Err(ConfigError::invalid("provider", "api_token", "empty", None));
    }
    if config.provider.folder_id == 0
        && config
            .provider
            .folder_name
            .as_deref()
            .is_none_or(|name| name.trim().is_empty())
    {
        return Err(ConfigError::invalid(
            "provider",
            "folder_id",
            "unset_without_folder_name",
            None,
        ));
    }

    if config.engine.target_dir.as_os_str().is_empty() {
        return Err(ConfigError::invalid("engine", "target_dir", "empty", None));
    }
    if config.engine.worker_count == 0 {
        return Err(ConfigError::invalid(
            "engine",
            "worker_count",
            "zero",
            Some("0".to_string()),
        ));
    }

    for (field, value) in [
        (
            "transfer_check_interval_secs",
            config.engine.transfer_check_interval_secs,
        ),
        (
            "cache_update_interval_secs",
            config.engine.cache_update_interval_secs,
        ),
        (
            "progress_update_interval_secs",
            config.engine.progress_update_interval_secs,
        ),
        (
            "download_stall_timeout_secs",
            config.engine.download_stall_timeout_secs,
        ),
        (
            "download_header_timeout_secs",
            config.engine.download_header_timeout_secs,
        ),
        (
            "idle_connection_timeout_secs",
            config.engine.idle_connection_timeout_secs,
        ),
    ] {
        if value == 0 {
            return Err(ConfigError::invalid(
                "engine",
                field,
                "zero",
                Some(value.to_string()),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EngineProfile, LoggingProfile, ProviderProfile};
    use std::path::PathBuf;

    fn valid_config() -> WharfConfig {
        WharfConfig {
            provider: ProviderProfile {
                api_base: "https://api.example.com".to_string(),
                api_token: "secret".to_string(),
                folder_id: 42,
                folder_name: None,
            },
            engine: serde_yaml::from_str::<EngineProfile>("target_dir: /downloads\n")
                .expect("engine defaults"),
            logging: LoggingProfile::default(),
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn rejects_missing_token() {
        let mut config = valid_config();
        config.provider.api_token = String::new();
        let err = validate(&config).expect_err("expected token rejection");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "api_token",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_folder_without_name() {
        let mut config = valid_config();
        config.provider.folder_id = 0;
        assert!(validate(&config).is_err());

        config.provider.folder_name = Some("wharf".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_zero_worker_count() {
        let mut config = valid_config();
        config.engine.worker_count = 0;
        let err = validate(&config).expect_err("expected worker rejection");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "worker_count",
                reason: "zero",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_intervals() {
        let mut config = valid_config();
        config.engine.download_stall_timeout_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_empty_target_dir() {
        let mut config = valid_config();
        config.engine.target_dir = PathBuf::new();
        assert!(validate(&config).is_err());
    }
}
