//! Default values for configuration fields.
//!
//! # Design
//! - Keep every tunable default in one place so the serde defaults, the
//!   documentation, and the tests cannot drift apart.

/// Default size of the download worker pool.
pub(crate) const WORKER_COUNT: usize = 4;
/// Default reconciliation interval in seconds.
pub(crate) const TRANSFER_CHECK_INTERVAL_SECS: u64 = 30;
/// Default transfer cache refresh interval in seconds.
pub(crate) const CACHE_UPDATE_INTERVAL_SECS: u64 = 300;
/// Default progress reporting interval in seconds.
pub(crate) const PROGRESS_UPDATE_INTERVAL_SECS: u64 = 5;
/// Default stall watchdog timeout in seconds.
pub(crate) const DOWNLOAD_STALL_TIMEOUT_SECS: u64 = 60;
/// Default response-header timeout in seconds.
pub(crate) const DOWNLOAD_HEADER_TIMEOUT_SECS: u64 = 30;
/// Default idle connection timeout in seconds.
pub(crate) const IDLE_CONNECTION_TIMEOUT_SECS: u64 = 60;
/// Default seeding time threshold in seconds (24h).
pub(crate) const SEEDING_TIME_THRESHOLD_SECS: u64 = 86_400;
/// Default retry budget for errored remote transfers.
pub(crate) const MAX_RETRY_ATTEMPTS: u32 = 3;
/// Default log level when the config omits one.
pub(crate) const LOG_LEVEL: &str = "info";
