//! Error types for configuration loading and validation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO failure while reading the configuration file.
    #[error("config io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// YAML parsing failure.
    #[error("config parse failure")]
    Parse {
        /// Path of the document that failed to parse.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
}

impl ConfigError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(
        section: &'static str,
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidField {
            section,
            field,
            reason,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn io_helper_preserves_source() {
        let err = ConfigError::io("read", "wharf.yaml", io::Error::other("io"));
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn invalid_helper_carries_context() {
        let err = ConfigError::invalid("engine", "worker_count", "zero", Some("0".to_string()));
        let ConfigError::InvalidField {
            section,
            field,
            reason,
            value,
        } = err
        else {
            panic!("expected invalid field variant");
        };
        assert_eq!(section, "engine");
        assert_eq!(field, "worker_count");
        assert_eq!(reason, "zero");
        assert_eq!(value.as_deref(), Some("0"));
    }
}
