//! Two-phase progress projection for the RPC front-end.
//!
//! Remote completion maps onto the first half of the client-facing fraction
//! and local completion onto the second half, so consumers see a single
//! 0..=1 value that only reaches 1.0 once the payload is on local disk.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::error;
use wharf_provider::{Transfer, TransferStatus};

use crate::context::{ContextSnapshot, TransferPhase};

/// Transmission dialect: stopped / errored.
pub const STATUS_STOPPED: i64 = 0;
/// Transmission dialect: queued for download.
pub const STATUS_QUEUED: i64 = 3;
/// Transmission dialect: downloading.
pub const STATUS_DOWNLOAD: i64 = 4;
/// Transmission dialect: seeding (used for fully processed transfers).
pub const STATUS_SEED: i64 = 6;

/// Client-facing projection of a transfer's progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Completion fraction in `0.0..=1.0`.
    pub percent_done: f64,
    /// Bytes left before end-to-end completion.
    pub left_until_done: u64,
    /// Transmission status code.
    pub status: i64,
    /// Local download speed in bytes per second, when observed.
    pub local_speed_bps: Option<u64>,
    /// Local ETA in seconds, when computable.
    pub local_eta_secs: Option<u64>,
}

/// Deterministic progress projection with a small per-transfer memo.
///
/// The projection itself is pure; the memo is invalidated whenever the cache
/// refreshes or a transfer's local byte count changes.
pub struct ProgressCalculator {
    memo: Mutex<HashMap<u64, ProgressSnapshot>>,
}

impl ProgressCalculator {
    /// Construct an empty calculator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Project progress for a transfer, consulting the memo first.
    #[must_use]
    pub fn project(&self, remote: &Transfer, ctx: Option<&ContextSnapshot>) -> ProgressSnapshot {
        if let Some(cached) = self.lock_memo().get(&remote.id) {
            return *cached;
        }
        let snapshot = compute(remote, ctx);
        self.lock_memo().insert(remote.id, snapshot);
        snapshot
    }

    /// Drop the memo entry for one transfer.
    pub fn invalidate(&self, transfer_id: u64) {
        let _ = self.lock_memo().remove(&transfer_id);
    }

    /// Drop every memo entry.
    pub fn clear(&self) {
        self.lock_memo().clear();
    }

    fn lock_memo(&self) -> MutexGuard<'_, HashMap<u64, ProgressSnapshot>> {
        match self.memo.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("progress memo mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for ProgressCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure projection of remote and local state into a client-facing snapshot.
#[must_use]
pub(crate) fn compute(remote: &Transfer, ctx: Option<&ContextSnapshot>) -> ProgressSnapshot {
    let Some(ctx) = ctx else {
        if remote.status.is_ready() {
            return ProgressSnapshot {
                percent_done: 1.0,
                left_until_done: 0,
                status: STATUS_SEED,
                local_speed_bps: None,
                local_eta_secs: None,
            };
        }
        return ProgressSnapshot {
            percent_done: remote_fraction(remote) * 0.5,
            left_until_done: remote.remote_left_bytes(),
            status: map_status(remote.status),
            local_speed_bps: None,
            local_eta_secs: None,
        };
    };

    match ctx.phase {
        TransferPhase::Processed => ProgressSnapshot {
            percent_done: 1.0,
            left_until_done: 0,
            status: STATUS_SEED,
            local_speed_bps: None,
            local_eta_secs: None,
        },
        TransferPhase::Completed => ProgressSnapshot {
            percent_done: 1.0,
            left_until_done: 0,
            status: map_status(remote.status),
            local_speed_bps: None,
            local_eta_secs: None,
        },
        _ => {
            let local = local_fraction(ctx);
            let left = remote
                .remote_left_bytes()
                .saturating_add(ctx.local_left_bytes());
            ProgressSnapshot {
                percent_done: remote_fraction(remote).mul_add(0.5, local * 0.5),
                left_until_done: left,
                status: STATUS_DOWNLOAD,
                local_speed_bps: ctx.rate.map(|rate| rate.bytes_per_sec),
                local_eta_secs: ctx.rate.and_then(|rate| rate.eta_secs),
            }
        }
    }
}

fn remote_fraction(remote: &Transfer) -> f64 {
    f64::from(remote.percent_done.min(100)) / 100.0
}

/// Local completion fraction, preferring bytes over file counts.
fn local_fraction(ctx: &ContextSnapshot) -> f64 {
    let fraction = if ctx.total_size > 0 {
        to_f64(ctx.downloaded_size) / to_f64(ctx.total_size)
    } else if ctx.total_files > 0 {
        to_f64(ctx.completed_files) / to_f64(ctx.total_files)
    } else {
        0.0
    };
    fraction.clamp(0.0, 1.0)
}

const fn map_status(status: TransferStatus) -> i64 {
    match status {
        TransferStatus::InQueue => STATUS_QUEUED,
        TransferStatus::Downloading | TransferStatus::Completing => STATUS_DOWNLOAD,
        TransferStatus::Seeding | TransferStatus::Completed => STATUS_SEED,
        TransferStatus::Waiting | TransferStatus::Preparing | TransferStatus::Error => {
            STATUS_STOPPED
        }
    }
}

const fn to_f64(value: u64) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "u64 to f64 conversion is required for client-facing fractions"
    )]
    {
        value as f64
    }
}
