//! # Design
//!
//! - Structured, constant-message errors for Provider interactions.
//! - Capture the failing operation so call sites stay greppable.
//! - Preserve source errors without interpolating context into messages.

use thiserror::Error;

/// Result type for Provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// HTTP status codes worth retrying at the caller's discretion.
const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Errors produced by Provider interactions.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The Provider answered with a non-success status.
    #[error("provider request rejected")]
    Http {
        /// Operation that triggered the rejection.
        operation: &'static str,
        /// HTTP status code returned by the Provider.
        status: u16,
        /// Response body snippet when available.
        detail: Option<String>,
    },
    /// Transport-level failure talking to the Provider.
    #[error("provider network failure")]
    Network {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying transport error.
        source: reqwest::Error,
    },
    /// The Provider's response body failed to decode.
    #[error("provider response decode failure")]
    Decode {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying decode error.
        source: serde_json::Error,
    },
    /// The requested object does not exist on the Provider.
    #[error("provider object not found")]
    NotFound {
        /// Operation that triggered the lookup.
        operation: &'static str,
        /// Identifier that failed to resolve.
        id: u64,
    },
    /// The response was well-formed but semantically unusable.
    #[error("provider response invalid")]
    InvalidResponse {
        /// Operation that produced the response.
        operation: &'static str,
        /// Static reason for the rejection.
        reason: &'static str,
    },
    /// The configured base URL could not be parsed.
    #[error("provider base url invalid")]
    InvalidBaseUrl {
        /// Offending URL value.
        value: String,
    },
}

impl ProviderError {
    pub(crate) fn network(operation: &'static str, source: reqwest::Error) -> Self {
        Self::Network { operation, source }
    }

    pub(crate) fn decode(operation: &'static str, source: serde_json::Error) -> Self {
        Self::Decode { operation, source }
    }

    /// Whether the error means the remote object is gone.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Http {
                    status: 404,
                    ..
                }
        )
    }

    /// Whether the caller may reasonably retry the operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::Network { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Decode { .. }
            | Self::NotFound { .. }
            | Self::InvalidResponse { .. }
            | Self::InvalidBaseUrl { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_covers_typed_and_http_variants() {
        let typed = ProviderError::NotFound {
            operation: "get_file",
            id: 4,
        };
        assert!(typed.is_not_found());

        let http = ProviderError::Http {
            operation: "get_file",
            status: 404,
            detail: None,
        };
        assert!(http.is_not_found());

        let other = ProviderError::Http {
            operation: "get_file",
            status: 500,
            detail: None,
        };
        assert!(!other.is_not_found());
    }

    #[test]
    fn retryable_statuses_are_bounded() {
        for status in [429, 502, 503, 504] {
            let err = ProviderError::Http {
                operation: "list_transfers",
                status,
                detail: None,
            };
            assert!(err.is_retryable(), "status {status} should be retryable");
        }
        let err = ProviderError::Http {
            operation: "list_transfers",
            status: 400,
            detail: None,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn decode_errors_are_not_retryable() {
        let source = serde_json::from_str::<serde_json::Value>("nope").unwrap_err();
        let err = ProviderError::decode("list_transfers", source);
        assert!(!err.is_retryable());
    }
}
