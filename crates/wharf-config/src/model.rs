//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers; loading and validation live in `loader.rs` and
//!   `validate.rs`.
//! - Durations are stored as integer seconds in the document and exposed as
//!   [`Duration`] through accessor methods.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root configuration document for the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WharfConfig {
    /// Provider connection settings.
    pub provider: ProviderProfile,
    /// Transfer engine settings.
    pub engine: EngineProfile,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingProfile,
}

/// Connection settings for the remote Provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Base URL of the Provider REST API.
    pub api_base: String,
    /// Bearer token used to authenticate API calls. May be supplied through
    /// the `WHARF_API_TOKEN` environment variable instead.
    #[serde(default)]
    pub api_token: String,
    /// Identifier of the Provider folder that scopes tracked transfers.
    /// When zero, the folder is resolved from `folder_name` at startup.
    #[serde(default)]
    pub folder_id: u64,
    /// Name of the Provider folder to resolve (and create when missing)
    /// when `folder_id` is not set explicitly.
    #[serde(default)]
    pub folder_name: Option<String>,
}

/// Transfer engine settings consulted by the lifecycle core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineProfile {
    /// Destination root for downloaded files and persisted state.
    pub target_dir: PathBuf,
    /// Size of the download worker pool.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Reconciliation interval in seconds.
    #[serde(default = "default_transfer_check_interval")]
    pub transfer_check_interval_secs: u64,
    /// Transfer cache refresh interval in seconds.
    #[serde(default = "default_cache_update_interval")]
    pub cache_update_interval_secs: u64,
    /// Progress reporting interval in seconds.
    #[serde(default = "default_progress_update_interval")]
    pub progress_update_interval_secs: u64,
    /// Stall watchdog timeout in seconds.
    #[serde(default = "default_download_stall_timeout")]
    pub download_stall_timeout_secs: u64,
    /// Response-header timeout in seconds.
    #[serde(default = "default_download_header_timeout")]
    pub download_header_timeout_secs: u64,
    /// Idle connection timeout in seconds.
    #[serde(default = "default_idle_connection_timeout")]
    pub idle_connection_timeout_secs: u64,
    /// Seeding time threshold in seconds before a seeding transfer is
    /// cancelled remotely.
    #[serde(default = "default_seeding_time_threshold")]
    pub seeding_time_threshold_secs: u64,
    /// Retry budget for errored remote transfers.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

impl EngineProfile {
    /// Reconciliation interval.
    #[must_use]
    pub const fn transfer_check_interval(&self) -> Duration {
        Duration::from_secs(self.transfer_check_interval_secs)
    }

    /// Transfer cache refresh interval.
    #[must_use]
    pub const fn cache_update_interval(&self) -> Duration {
        Duration::from_secs(self.cache_update_interval_secs)
    }

    /// Progress reporting interval.
    #[must_use]
    pub const fn progress_update_interval(&self) -> Duration {
        Duration::from_secs(self.progress_update_interval_secs)
    }

    /// Stall watchdog timeout.
    #[must_use]
    pub const fn download_stall_timeout(&self) -> Duration {
        Duration::from_secs(self.download_stall_timeout_secs)
    }

    /// Response-header timeout.
    #[must_use]
    pub const fn download_header_timeout(&self) -> Duration {
        Duration::from_secs(self.download_header_timeout_secs)
    }

    /// Idle connection timeout.
    #[must_use]
    pub const fn idle_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_connection_timeout_secs)
    }

    /// Seeding time threshold.
    #[must_use]
    pub const fn seeding_time_threshold(&self) -> Duration {
        Duration::from_secs(self.seeding_time_threshold_secs)
    }
}

/// Logging settings applied during telemetry initialisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingProfile {
    /// Log level directive (e.g. `info`, `wharf_engine=debug`).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format selection for the tracing subscriber.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingProfile {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Available output formats for the logger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Choose JSON in release builds and pretty output otherwise.
    #[default]
    Auto,
    /// Emit logs as structured JSON objects.
    Json,
    /// Emit human-readable logs.
    Pretty,
}

fn default_worker_count() -> usize {
    defaults::WORKER_COUNT
}

fn default_transfer_check_interval() -> u64 {
    defaults::TRANSFER_CHECK_INTERVAL_SECS
}

fn default_cache_update_interval() -> u64 {
    defaults::CACHE_UPDATE_INTERVAL_SECS
}

fn default_progress_update_interval() -> u64 {
    defaults::PROGRESS_UPDATE_INTERVAL_SECS
}

fn default_download_stall_timeout() -> u64 {
    defaults::DOWNLOAD_STALL_TIMEOUT_SECS
}

fn default_download_header_timeout() -> u64 {
    defaults::DOWNLOAD_HEADER_TIMEOUT_SECS
}

fn default_idle_connection_timeout() -> u64 {
    defaults::IDLE_CONNECTION_TIMEOUT_SECS
}

fn default_seeding_time_threshold() -> u64 {
    defaults::SEEDING_TIME_THRESHOLD_SECS
}

fn default_max_retry_attempts() -> u32 {
    defaults::MAX_RETRY_ATTEMPTS
}

fn default_log_level() -> String {
    defaults::LOG_LEVEL.to_string()
}
