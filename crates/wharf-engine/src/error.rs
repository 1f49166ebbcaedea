//! # Design
//!
//! - Structured, constant-message errors for the transfer lifecycle engine.
//! - Classification helpers decide retry and cancellation handling by
//!   walking the typed error chain first; substring matching only ever runs
//!   against the fully rendered chain, never a leaf message.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use wharf_provider::ProviderError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// HTTP status codes the download workers treat as transient.
const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Substrings that mark a rendered error chain as a transient network
/// failure when structured detection falls short.
const TRANSIENT_MARKERS: [&str; 4] = [
    "connection reset",
    "connection refused",
    "broken pipe",
    "timed out",
];

/// Why a download attempt was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The lifecycle root was shut down.
    Shutdown,
    /// The stall watchdog aborted the attempt.
    Stalled,
}

impl CancelReason {
    /// Human-readable label used in logs and context errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Stalled => "stalled",
        }
    }
}

/// Errors produced by the transfer lifecycle engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A download attempt was cancelled before completion.
    #[error("download cancelled")]
    DownloadCancelled {
        /// File whose download was cancelled; zero when not file-scoped.
        file_id: u64,
        /// Why the attempt was cancelled.
        reason: CancelReason,
    },
    /// The stall watchdog saw no progress for longer than the timeout.
    #[error("download stalled")]
    DownloadStalled {
        /// File whose download stalled.
        file_id: u64,
        /// Seconds without observed progress.
        idle_secs: u64,
    },
    /// The server reported a non-positive content length.
    #[error("invalid content length")]
    InvalidContentLength {
        /// File whose download was rejected.
        file_id: u64,
        /// Reported length; negative when the header was absent.
        length: i64,
    },
    /// The server answered with an unexpected HTTP status.
    #[error("unexpected http status")]
    HttpStatus {
        /// File whose download was rejected.
        file_id: u64,
        /// Status code returned by the server.
        status: u16,
    },
    /// The response headers did not arrive within the allowed window.
    #[error("response header timeout")]
    HeaderTimeout {
        /// File whose download timed out.
        file_id: u64,
        /// Seconds waited for the headers.
        waited_secs: u64,
    },
    /// The response body ended before the expected size was reached.
    #[error("download truncated")]
    Truncated {
        /// File whose download was truncated.
        file_id: u64,
        /// Bytes the server promised.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },
    /// Transport-level failure during a download.
    #[error("engine network failure")]
    Network {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying transport error.
        source: reqwest::Error,
    },
    /// IO failure while writing downloaded data.
    #[error("engine io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// No tracked context exists for the given transfer id.
    #[error("transfer not found")]
    TransferNotFound {
        /// Transfer id that failed to resolve.
        transfer_id: u64,
    },
    /// No cached transfer exists for the given content hash.
    #[error("transfer hash unknown")]
    UnknownHash {
        /// Hash that failed to resolve.
        hash: String,
    },
    /// The coordinator rejected a lifecycle transition.
    #[error("invalid transfer state transition")]
    InvalidTransition {
        /// Transfer whose transition was rejected.
        transfer_id: u64,
        /// State the transfer was in.
        from: &'static str,
        /// State the caller asked for.
        to: &'static str,
    },
    /// A ready, non-seeding transfer reported zero files.
    #[error("transfer has no files")]
    NoFilesFound {
        /// Transfer that reported no files.
        transfer_id: u64,
    },
    /// A local path derived from remote input was unsafe to use.
    #[error("unsafe local path")]
    UnsafePath {
        /// Offending path value.
        value: String,
    },
    /// A Provider call failed.
    #[error("provider call failed")]
    Provider {
        /// Operation that triggered the call.
        operation: &'static str,
        /// Underlying Provider error.
        source: ProviderError,
    },
}

impl EngineError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) const fn network(operation: &'static str, source: reqwest::Error) -> Self {
        Self::Network { operation, source }
    }

    pub(crate) const fn provider(operation: &'static str, source: ProviderError) -> Self {
        Self::Provider { operation, source }
    }

    /// Whether the error is a cancellation-kind outcome. Cancellations never
    /// fail a transfer and skip cleanup hooks.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::DownloadCancelled { .. })
    }

    /// Whether a download worker may retry the operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::HeaderTimeout { .. } | Self::Truncated { .. } => true,
            Self::Network { source, .. } => {
                source.is_timeout() || source.is_connect() || chain_is_transient(source)
            }
            Self::Provider { source, .. } => source.is_retryable(),
            Self::DownloadCancelled { .. }
            | Self::DownloadStalled { .. }
            | Self::InvalidContentLength { .. }
            | Self::Io { .. }
            | Self::TransferNotFound { .. }
            | Self::UnknownHash { .. }
            | Self::InvalidTransition { .. }
            | Self::NoFilesFound { .. }
            | Self::UnsafePath { .. } => false,
        }
    }

    /// Whether the underlying Provider reported the object as gone.
    #[must_use]
    pub fn is_remote_vanished(&self) -> bool {
        matches!(self, Self::Provider { source, .. } if source.is_not_found())
    }
}

/// Render an error and its full source chain into a single line.
#[must_use]
pub fn chain_text(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut cursor = err.source();
    while let Some(source) = cursor {
        rendered.push_str(": ");
        rendered.push_str(&source.to_string());
        cursor = source.source();
    }
    rendered
}

/// Substring-match the fully rendered chain against transient markers.
fn chain_is_transient(err: &dyn std::error::Error) -> bool {
    let rendered = chain_text(err).to_ascii_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| rendered.contains(marker))
}
