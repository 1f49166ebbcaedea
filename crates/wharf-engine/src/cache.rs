//! In-memory snapshot cache of Provider transfers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, error};
use wharf_events::{Event, EventBus};
use wharf_provider::{ProviderClient, Transfer};

use crate::error::{EngineError, EngineResult};
use crate::progress::ProgressCalculator;

/// Cached Provider transfer plus the locally accumulated byte count.
#[derive(Debug, Clone)]
pub struct CachedTransfer {
    /// Remote snapshot from the last cache rebuild.
    pub transfer: Transfer,
    /// Bytes accounted for by local downloads.
    pub downloaded_size: u64,
}

#[derive(Default)]
struct Indices {
    by_hash: HashMap<String, CachedTransfer>,
    id_to_hash: HashMap<u64, String>,
    last_refresh: Option<Instant>,
}

/// Interval-gated snapshot store keyed by both content hash and transfer id.
///
/// Rebuilds replace the indices wholesale rather than mutating them in
/// place; readers always observe one consistent listing.
pub struct TransferCache {
    provider: Arc<dyn ProviderClient>,
    progress: Arc<ProgressCalculator>,
    events: EventBus,
    interval: Duration,
    inner: RwLock<Indices>,
}

impl TransferCache {
    /// Construct a cache refreshing at most once per `interval`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        progress: Arc<ProgressCalculator>,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        Self {
            provider,
            progress,
            events,
            interval,
            inner: RwLock::new(Indices::default()),
        }
    }

    /// Rebuild the cache from a fresh Provider listing unless the configured
    /// interval has not elapsed yet. Transfers without a hash are skipped;
    /// locally accumulated byte counts survive the rebuild.
    ///
    /// # Errors
    ///
    /// Returns an error when the Provider listing fails.
    pub async fn refresh(&self) -> EngineResult<()> {
        if !self.is_stale() {
            return Ok(());
        }

        let transfers = self
            .provider
            .list_transfers()
            .await
            .map_err(|source| EngineError::provider("list_transfers", source))?;

        let mut by_hash = HashMap::new();
        let mut id_to_hash = HashMap::new();
        {
            let current = self.read_inner();
            for transfer in transfers {
                let Some(hash) = transfer.hash.clone().filter(|hash| !hash.is_empty()) else {
                    debug!(transfer_id = transfer.id, "skipping transfer without hash");
                    continue;
                };
                let downloaded_size = current
                    .id_to_hash
                    .get(&transfer.id)
                    .and_then(|hash| current.by_hash.get(hash))
                    .map_or(0, |cached| cached.downloaded_size);
                id_to_hash.insert(transfer.id, hash.clone());
                by_hash.insert(
                    hash,
                    CachedTransfer {
                        transfer,
                        downloaded_size,
                    },
                );
            }
        }

        let count = by_hash.len();
        {
            let mut inner = self.write_inner();
            inner.by_hash = by_hash;
            inner.id_to_hash = id_to_hash;
            inner.last_refresh = Some(Instant::now());
        }
        self.progress.clear();
        let _ = self.events.publish(Event::CacheRefreshed { transfers: count });
        Ok(())
    }

    /// All cached transfers, in no particular order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<CachedTransfer> {
        self.read_inner().by_hash.values().cloned().collect()
    }

    /// Look up a transfer by content hash.
    #[must_use]
    pub fn by_hash(&self, hash: &str) -> Option<CachedTransfer> {
        self.read_inner().by_hash.get(hash).cloned()
    }

    /// Look up a transfer by remote id.
    #[must_use]
    pub fn by_id(&self, transfer_id: u64) -> Option<CachedTransfer> {
        let inner = self.read_inner();
        inner
            .id_to_hash
            .get(&transfer_id)
            .and_then(|hash| inner.by_hash.get(hash))
            .cloned()
    }

    /// Patch the locally accumulated byte count for a transfer and
    /// invalidate its progress memo entry.
    pub fn update_progress(&self, transfer_id: u64, downloaded_size: u64) {
        {
            let mut inner = self.write_inner();
            let Some(hash) = inner.id_to_hash.get(&transfer_id).cloned() else {
                return;
            };
            if let Some(cached) = inner.by_hash.get_mut(&hash) {
                cached.downloaded_size = cached.downloaded_size.max(downloaded_size);
            }
        }
        self.progress.invalidate(transfer_id);
    }

    /// Drop a transfer from both indices.
    pub fn remove(&self, transfer_id: u64) {
        {
            let mut inner = self.write_inner();
            if let Some(hash) = inner.id_to_hash.remove(&transfer_id) {
                let _ = inner.by_hash.remove(&hash);
            }
        }
        self.progress.invalidate(transfer_id);
    }

    fn is_stale(&self) -> bool {
        self.read_inner()
            .last_refresh
            .is_none_or(|at| at.elapsed() >= self.interval)
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Indices> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("transfer cache lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Indices> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("transfer cache lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}
