//! Application-level error type wrapping subsystem failures.

use thiserror::Error;
use wharf_config::ConfigError;
use wharf_engine::EngineError;
use wharf_provider::ProviderError;

/// Result type for application bootstrap operations.
pub(crate) type AppResult<T> = Result<T, AppError>;

/// Errors surfaced by the application shell.
#[derive(Debug, Error)]
pub(crate) enum AppError {
    /// Configuration loading or validation failed.
    #[error("configuration failure")]
    Config {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying configuration error.
        source: ConfigError,
    },
    /// A Provider call during bootstrap failed.
    #[error("provider failure")]
    Provider {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying Provider error.
        source: ProviderError,
    },
    /// The engine reported a failure.
    #[error("engine failure")]
    Engine {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying engine error.
        source: EngineError,
    },
    /// The tracing subscriber could not be installed.
    #[error("telemetry failure")]
    Telemetry {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying subscriber error.
        source: tracing_subscriber::util::TryInitError,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn provider(operation: &'static str, source: ProviderError) -> Self {
        Self::Provider { operation, source }
    }

    pub(crate) const fn engine(operation: &'static str, source: EngineError) -> Self {
        Self::Engine { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: tracing_subscriber::util::TryInitError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn helpers_preserve_sources() {
        let err = AppError::engine(
            "engine.start",
            EngineError::TransferNotFound { transfer_id: 1 },
        );
        assert!(matches!(err, AppError::Engine { .. }));
        assert!(err.source().is_some());
    }
}
