//! Domain types shared between the Provider adapter and the engine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote lifecycle states reported by the Provider.
///
/// The wire vocabulary is case-sensitive and fixed; unknown values are a
/// decode error rather than a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Queued on the Provider side, waiting for a slot.
    InQueue,
    /// Accepted but not yet scheduled.
    Waiting,
    /// Metadata resolution or allocation in progress.
    Preparing,
    /// Actively downloading remotely.
    Downloading,
    /// Remote download finishing up (hash checks, moves).
    Completing,
    /// Remote download finished; the Provider is seeding.
    Seeding,
    /// Remote download finished and seeding stopped.
    Completed,
    /// The Provider gave up on the transfer.
    Error,
}

impl TransferStatus {
    /// Wire representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InQueue => "IN_QUEUE",
            Self::Waiting => "WAITING",
            Self::Preparing => "PREPARING",
            Self::Downloading => "DOWNLOADING",
            Self::Completing => "COMPLETING",
            Self::Seeding => "SEEDING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
        }
    }

    /// Whether the transfer's files are available for local download.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Completed | Self::Seeding)
    }

    /// Whether the Provider is still seeding the transfer.
    #[must_use]
    pub const fn is_seeding(self) -> bool {
        matches!(self, Self::Seeding)
    }

    /// Whether the Provider reported a failure.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }
}

/// Snapshot of a remote transfer as reported by the Provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// Stable numeric identifier.
    pub id: u64,
    /// Infohash-like content identifier; absent while metadata resolves.
    #[serde(default)]
    pub hash: Option<String>,
    /// Display name.
    pub name: String,
    /// Identifier of the Provider folder containing the transfer.
    #[serde(default)]
    pub save_parent_id: u64,
    /// Total payload size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Bytes downloaded remotely so far.
    #[serde(default)]
    pub downloaded: u64,
    /// Remote completion percentage (0-100).
    #[serde(default)]
    pub percent_done: u8,
    /// Remote lifecycle status.
    pub status: TransferStatus,
    /// Seconds the Provider has been seeding this transfer.
    #[serde(default)]
    pub seconds_seeding: u64,
    /// Root file node on the Provider side, when materialised.
    #[serde(default)]
    pub file_id: Option<u64>,
    /// Failure detail reported by the Provider.
    #[serde(default)]
    pub error_message: Option<String>,
    /// When the transfer was submitted.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the remote download finished.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// Remote bytes still missing before the Provider finishes.
    #[must_use]
    pub const fn remote_left_bytes(&self) -> u64 {
        self.size.saturating_sub(self.downloaded)
    }
}

/// Node kind within the Provider's file tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    /// Container node with children.
    Folder,
    /// Leaf node with downloadable content.
    File,
}

/// File node within a transfer on the Provider side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Stable numeric identifier.
    pub id: u64,
    /// Identifier of the parent folder node.
    #[serde(default)]
    pub parent_id: u64,
    /// Node name (single path segment).
    pub name: String,
    /// Content size in bytes; zero for folders.
    #[serde(default)]
    pub size: u64,
    /// Node kind.
    pub kind: FileKind,
}

impl RemoteFile {
    /// Whether the node is a downloadable leaf.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self.kind, FileKind::File)
    }
}

/// A downloadable file paired with its path relative to the transfer root.
#[derive(Debug, Clone)]
pub struct TransferEntry {
    /// Leaf node on the Provider side.
    pub file: RemoteFile,
    /// Path of the file relative to the transfer's own directory.
    pub relative_path: PathBuf,
}

/// Account details reported by the Provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Account user name.
    pub username: String,
    /// Remote disk usage summary.
    pub disk: DiskUsage,
}

/// Remote disk usage summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiskUsage {
    /// Bytes currently in use.
    pub used: u64,
    /// Total bytes available to the account.
    pub total: u64,
    /// Bytes still free.
    pub avail: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_wire_strings() {
        for status in [
            TransferStatus::InQueue,
            TransferStatus::Waiting,
            TransferStatus::Preparing,
            TransferStatus::Downloading,
            TransferStatus::Completing,
            TransferStatus::Seeding,
            TransferStatus::Completed,
            TransferStatus::Error,
        ] {
            let raw = serde_json::to_string(&status).expect("serialize status");
            assert_eq!(raw, format!("\"{}\"", status.as_str()));
            let parsed: TransferStatus = serde_json::from_str(&raw).expect("parse status");
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let err = serde_json::from_str::<TransferStatus>("\"PAUSED\"");
        assert!(err.is_err(), "unexpected status string must not decode");
    }

    #[test]
    fn readiness_covers_completed_and_seeding() {
        assert!(TransferStatus::Completed.is_ready());
        assert!(TransferStatus::Seeding.is_ready());
        assert!(!TransferStatus::Downloading.is_ready());
        assert!(!TransferStatus::Error.is_ready());
    }

    #[test]
    fn transfer_decodes_with_optional_fields_absent() {
        let raw = r#"{"id": 9, "name": "demo", "status": "DOWNLOADING"}"#;
        let transfer: Transfer = serde_json::from_str(raw).expect("parse transfer");
        assert_eq!(transfer.id, 9);
        assert!(transfer.hash.is_none());
        assert!(transfer.file_id.is_none());
        assert_eq!(transfer.percent_done, 0);
    }

    #[test]
    fn remote_left_bytes_saturates() {
        let raw = r#"{"id": 1, "name": "demo", "status": "SEEDING", "size": 10, "downloaded": 25}"#;
        let transfer: Transfer = serde_json::from_str(raw).expect("parse transfer");
        assert_eq!(transfer.remote_left_bytes(), 0);
    }
}
