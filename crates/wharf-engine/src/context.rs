//! Per-transfer tracking state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::error;

/// Local lifecycle of a tracked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Tracked but not yet downloading.
    Initial,
    /// Files are being fetched by the worker pool.
    Downloading,
    /// Every file finished locally; cleanup has not run yet.
    Completed,
    /// Cleanup hooks ran; the transfer is done end to end.
    Processed,
    /// At least one file failed permanently.
    Failed,
    /// The transfer was cancelled by shutdown or operator action.
    Cancelled,
}

impl TransferPhase {
    /// Human-readable label used in logs and transition errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Last-observed local transfer rate for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRate {
    /// Bytes fetched per second over the last progress window.
    pub bytes_per_sec: u64,
    /// Estimated seconds until local completion, when computable.
    pub eta_secs: Option<u64>,
}

/// Mutable lifecycle slot guarded by the context mutex.
#[derive(Debug)]
pub(crate) struct PhaseSlot {
    /// Current lifecycle phase.
    pub(crate) phase: TransferPhase,
    /// Most recent failure or cancellation detail.
    pub(crate) last_error: Option<String>,
    /// Set while cleanup hooks run so finalisation happens exactly once.
    pub(crate) finalizing: bool,
}

/// Tracking state for one remote transfer.
///
/// Counters use atomics so workers can report without taking the phase
/// mutex; transition decisions always read them while holding it.
#[derive(Debug)]
pub struct TransferContext {
    /// Remote transfer identifier.
    pub id: u64,
    /// Display name; doubles as the transfer's directory under the target.
    pub name: String,
    /// Root file node on the Provider side; zero when absent.
    pub root_file_id: u64,
    /// Number of files the transfer is waiting on. Write-once.
    pub total_files: u64,
    completed_files: AtomicU64,
    failed_files: AtomicU64,
    total_size: AtomicU64,
    downloaded_size: AtomicU64,
    state: Mutex<PhaseSlot>,
    rate: Mutex<Option<LocalRate>>,
}

impl TransferContext {
    pub(crate) fn new(id: u64, name: &str, root_file_id: u64, total_files: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            root_file_id,
            total_files,
            completed_files: AtomicU64::new(0),
            failed_files: AtomicU64::new(0),
            total_size: AtomicU64::new(0),
            downloaded_size: AtomicU64::new(0),
            state: Mutex::new(PhaseSlot {
                phase: TransferPhase::Initial,
                last_error: None,
                finalizing: false,
            }),
            rate: Mutex::new(None),
        }
    }

    /// Files that finished locally (downloaded or already present).
    #[must_use]
    pub fn completed_files(&self) -> u64 {
        self.completed_files.load(Ordering::Acquire)
    }

    /// Files that failed permanently.
    #[must_use]
    pub fn failed_files(&self) -> u64 {
        self.failed_files.load(Ordering::Acquire)
    }

    /// Total payload size recorded at enumeration time.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Acquire)
    }

    /// Bytes accounted for locally. Monotonically non-decreasing.
    #[must_use]
    pub fn downloaded_size(&self) -> u64 {
        self.downloaded_size.load(Ordering::Acquire)
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> TransferPhase {
        self.lock_state().phase
    }

    /// Most recent failure or cancellation detail.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.lock_state().last_error.clone()
    }

    /// Last-observed local rate.
    #[must_use]
    pub fn rate(&self) -> Option<LocalRate> {
        *self.lock_rate()
    }

    /// Add locally accounted bytes. Only ever increases.
    pub fn add_downloaded(&self, bytes: u64) {
        if bytes > 0 {
            self.downloaded_size.fetch_add(bytes, Ordering::AcqRel);
        }
    }

    /// Record the enumerated payload size.
    pub(crate) fn set_total_size(&self, bytes: u64) {
        self.total_size.store(bytes, Ordering::Release);
    }

    /// Record the last-observed local rate.
    pub(crate) fn record_rate(&self, rate: LocalRate) {
        *self.lock_rate() = Some(rate);
    }

    pub(crate) fn increment_completed(&self) -> u64 {
        self.completed_files.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn increment_failed(&self) -> u64 {
        self.failed_files.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, PhaseSlot> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!(
                    transfer_id = self.id,
                    "transfer state mutex poisoned; continuing with recovered guard"
                );
                poisoned.into_inner()
            }
        }
    }

    fn lock_rate(&self) -> MutexGuard<'_, Option<LocalRate>> {
        match self.rate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!(
                    transfer_id = self.id,
                    "transfer rate mutex poisoned; continuing with recovered guard"
                );
                poisoned.into_inner()
            }
        }
    }

    /// Immutable view of the context for progress projection.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        let (phase, last_error) = {
            let state = self.lock_state();
            (state.phase, state.last_error.clone())
        };
        ContextSnapshot {
            transfer_id: self.id,
            phase,
            last_error,
            total_files: self.total_files,
            completed_files: self.completed_files(),
            failed_files: self.failed_files(),
            total_size: self.total_size(),
            downloaded_size: self.downloaded_size(),
            rate: self.rate(),
        }
    }
}

/// Point-in-time view of a [`TransferContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    /// Remote transfer identifier.
    pub transfer_id: u64,
    /// Lifecycle phase at snapshot time.
    pub phase: TransferPhase,
    /// Most recent failure or cancellation detail.
    pub last_error: Option<String>,
    /// Number of files the transfer is waiting on.
    pub total_files: u64,
    /// Files that finished locally.
    pub completed_files: u64,
    /// Files that failed permanently.
    pub failed_files: u64,
    /// Total payload size in bytes.
    pub total_size: u64,
    /// Bytes accounted for locally.
    pub downloaded_size: u64,
    /// Last-observed local rate.
    pub rate: Option<LocalRate>,
}

impl ContextSnapshot {
    /// Bytes still missing locally.
    #[must_use]
    pub const fn local_left_bytes(&self) -> u64 {
        self.total_size.saturating_sub(self.downloaded_size)
    }
}
