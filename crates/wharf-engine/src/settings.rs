//! Runtime settings consumed by the engine.
//!
//! The application layer maps its configuration document onto this struct so
//! the engine stays decoupled from any particular config format.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables consulted by the transfer lifecycle engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Destination root for downloaded files and persisted state.
    pub target_dir: PathBuf,
    /// Provider folder id scoping which transfers are tracked.
    pub folder_id: u64,
    /// Size of the download worker pool.
    pub worker_count: usize,
    /// Reconciliation interval.
    pub transfer_check_interval: Duration,
    /// Transfer cache refresh interval.
    pub cache_update_interval: Duration,
    /// Progress reporting interval for in-flight downloads.
    pub progress_update_interval: Duration,
    /// Idle time after which an in-flight download is aborted.
    pub download_stall_timeout: Duration,
    /// Time allowed for a download response's headers to arrive.
    pub download_header_timeout: Duration,
    /// Idle HTTP connection timeout for the download client pool.
    pub idle_connection_timeout: Duration,
    /// Seeding time after which a seeding transfer is cancelled remotely.
    pub seeding_time_threshold: Duration,
    /// Retry budget for errored remote transfers.
    pub max_retry_attempts: u32,
}

impl EngineSettings {
    /// Settings with production defaults for the given target directory and
    /// Provider folder.
    #[must_use]
    pub fn for_folder(target_dir: impl Into<PathBuf>, folder_id: u64) -> Self {
        Self {
            target_dir: target_dir.into(),
            folder_id,
            worker_count: 4,
            transfer_check_interval: Duration::from_secs(30),
            cache_update_interval: Duration::from_secs(300),
            progress_update_interval: Duration::from_secs(5),
            download_stall_timeout: Duration::from_secs(60),
            download_header_timeout: Duration::from_secs(30),
            idle_connection_timeout: Duration::from_secs(60),
            seeding_time_threshold: Duration::from_secs(86_400),
            max_retry_attempts: 3,
        }
    }

    /// Worker pool size with the configured floor applied.
    #[must_use]
    pub const fn effective_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            1
        } else {
            self.worker_count
        }
    }
}
