//! Periodic reconciliation between the Provider and the local engine.
//!
//! Each pass refreshes the cache, ingests ready transfers, culls over-seeded
//! ones, spends the retry budget on errored ones, re-queues files that lost
//! their worker (stall aborts, daemon restarts), and drives settled
//! transfers through finalisation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use wharf_events::{Event, EventBus};
use wharf_provider::{ProviderClient, Transfer, TransferEntry};

use crate::cache::TransferCache;
use crate::context::{TransferContext, TransferPhase};
use crate::coordinator::TransferCoordinator;
use crate::error::{EngineError, EngineResult};
use crate::pool::{DownloadJob, DownloadPool, EnqueueOutcome};
use crate::settings::EngineSettings;

/// Drives the reconciliation loop and owns the remote-retry bookkeeping.
pub(crate) struct TransferProcessor {
    provider: Arc<dyn ProviderClient>,
    coordinator: Arc<TransferCoordinator>,
    cache: Arc<TransferCache>,
    pool: Arc<DownloadPool>,
    events: EventBus,
    settings: EngineSettings,
    retry_counts: Mutex<HashMap<u64, u32>>,
}

impl TransferProcessor {
    /// Construct the processor and wire its callbacks into the coordinator:
    /// the cleanup hook deleting the remote copy and the processed callback
    /// dropping the transfer from the cache.
    pub(crate) fn new(
        provider: Arc<dyn ProviderClient>,
        coordinator: Arc<TransferCoordinator>,
        cache: Arc<TransferCache>,
        pool: Arc<DownloadPool>,
        events: EventBus,
        settings: EngineSettings,
    ) -> Arc<Self> {
        let processor = Arc::new(Self {
            provider,
            coordinator,
            cache,
            pool,
            events,
            settings,
            retry_counts: Mutex::new(HashMap::new()),
        });
        processor.install_callbacks();
        processor
    }

    fn install_callbacks(&self) {
        let provider = Arc::clone(&self.provider);
        let coordinator = Arc::downgrade(&self.coordinator);
        let events = self.events.clone();
        self.coordinator.register_cleanup_hook(move |id| {
            let provider = Arc::clone(&provider);
            let coordinator = coordinator.clone();
            let events = events.clone();
            async move {
                let root_file_id = coordinator
                    .upgrade()
                    .and_then(|coordinator| coordinator.get(id))
                    .map_or(0, |ctx| ctx.root_file_id);
                if root_file_id != 0 {
                    match provider.delete_file(root_file_id).await {
                        Ok(()) => {}
                        Err(err) if err.is_not_found() => {}
                        Err(source) => return Err(EngineError::provider("delete_file", source)),
                    }
                }
                match provider.delete_transfer(id).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(source) => return Err(EngineError::provider("delete_transfer", source)),
                }
                let _ = events.publish(Event::TransferRemoved { transfer_id: id });
                Ok(())
            }
            .boxed()
        });

        let cache = Arc::clone(&self.cache);
        self.coordinator.set_on_processed(move |id| {
            cache.remove(id);
        });
    }

    /// Reconciliation loop; returns once the shutdown token fires.
    pub(crate) async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.log_resumable_partials();
        let mut ticker = tokio::time::interval(self.settings.transfer_check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "reconciliation pass failed");
                    }
                }
            }
        }
        debug!("reconciler stopped");
    }

    /// One reconciliation pass.
    pub(crate) async fn tick(&self) -> EngineResult<()> {
        if let Err(err) = self.cache.refresh().await {
            warn!(error = %err, "transfer cache refresh failed");
        }

        let transfers = self
            .provider
            .list_transfers()
            .await
            .map_err(|source| EngineError::provider("list_transfers", source))?;
        let scoped: Vec<&Transfer> = transfers
            .iter()
            .filter(|transfer| transfer.save_parent_id == self.settings.folder_id)
            .collect();

        let ready = scoped.iter().filter(|t| t.status.is_ready()).count();
        let errored = scoped.iter().filter(|t| t.status.is_error()).count();
        info!(
            total = scoped.len(),
            ready,
            errored,
            pending = scoped.len() - ready - errored,
            "reconciling transfers"
        );

        for transfer in scoped.iter().copied() {
            if transfer.status.is_ready() {
                if let Err(err) = self.handle_ready(transfer).await {
                    warn!(
                        transfer_id = transfer.id,
                        error = %err,
                        "failed to handle ready transfer"
                    );
                }
            } else if transfer.status.is_error() {
                self.handle_errored(transfer).await;
            }
        }

        self.resume_tracked().await;
        self.finalize_tracked().await;
        Ok(())
    }

    async fn handle_ready(&self, transfer: &Transfer) -> EngineResult<()> {
        let tracked = self.coordinator.is_tracked(transfer.id);
        if self.is_over_seeded(transfer) && !tracked {
            info!(
                transfer_id = transfer.id,
                name = %transfer.name,
                seconds_seeding = transfer.seconds_seeding,
                "cancelling over-seeded transfer"
            );
            match self.provider.delete_transfer(transfer.id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(source) => return Err(EngineError::provider("delete_transfer", source)),
            }
            self.cache.remove(transfer.id);
            let _ = self.events.publish(Event::TransferRemoved {
                transfer_id: transfer.id,
            });
            return Ok(());
        }
        if tracked {
            return Ok(());
        }
        self.ingest(transfer).await
    }

    /// Begin tracking a ready transfer and queue whatever is missing
    /// locally. Files already on disk at their expected size count as
    /// completed immediately; files already in flight keep their worker.
    async fn ingest(&self, transfer: &Transfer) -> EngineResult<()> {
        let Some(root_file_id) = transfer.file_id.filter(|id| *id != 0) else {
            if transfer.status.is_seeding() {
                // Nothing to fetch yet; the transfer either materialises
                // files later or ages out through the seeding threshold.
                return Ok(());
            }
            let _ = self
                .coordinator
                .initiate_transfer(transfer.id, &transfer.name, 0, 0);
            self.coordinator.start_download(transfer.id)?;
            if self.coordinator.try_finish(transfer.id) {
                self.finalize(transfer.id).await;
            }
            return Ok(());
        };

        let entries = match self.provider.all_transfer_files(root_file_id).await {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => {
                let err = EngineError::provider("all_transfer_files", err);
                let _ = self.coordinator.initiate_transfer(
                    transfer.id,
                    &transfer.name,
                    root_file_id,
                    0,
                );
                self.coordinator.fail_transfer(transfer.id, &err).await?;
                return Ok(());
            }
            Err(source) => return Err(EngineError::provider("all_transfer_files", source)),
        };

        if entries.is_empty() {
            if transfer.status.is_seeding() {
                return Ok(());
            }
            let err = EngineError::NoFilesFound {
                transfer_id: transfer.id,
            };
            let _ =
                self.coordinator
                    .initiate_transfer(transfer.id, &transfer.name, root_file_id, 0);
            self.coordinator.fail_transfer(transfer.id, &err).await?;
            return Ok(());
        }

        let mut present: Vec<&TransferEntry> = Vec::new();
        let mut pending: Vec<&TransferEntry> = Vec::new();
        let mut in_flight = 0_u64;
        let mut total_size = 0_u64;
        for entry in &entries {
            total_size += entry.file.size;
            let target = self.target_for(&transfer.name, &entry.relative_path);
            if file_matches_size(&target, entry.file.size).await {
                present.push(entry);
            } else if self.pool.is_active(entry.file.id) {
                in_flight += 1;
            } else {
                pending.push(entry);
            }
        }

        let total_files = present.len() as u64 + pending.len() as u64 + in_flight;
        let ctx =
            self.coordinator
                .initiate_transfer(transfer.id, &transfer.name, root_file_id, total_files);
        ctx.set_total_size(total_size);
        self.coordinator.start_download(transfer.id)?;
        info!(
            transfer_id = transfer.id,
            name = %transfer.name,
            total_files,
            present = present.len(),
            queued = pending.len(),
            in_flight,
            "ingesting transfer"
        );

        for entry in present {
            ctx.add_downloaded(entry.file.size);
            self.cache
                .update_progress(transfer.id, ctx.downloaded_size());
            if let Err(err) = self.coordinator.file_completed(transfer.id) {
                debug!(
                    transfer_id = transfer.id,
                    error = %err,
                    "skip-existing completion rejected"
                );
            }
        }

        for entry in pending {
            self.enqueue_entry(transfer.id, &transfer.name, entry).await;
        }

        if self.coordinator.try_finish(transfer.id) {
            self.finalize(transfer.id).await;
        }
        Ok(())
    }

    async fn handle_errored(&self, transfer: &Transfer) {
        let attempts = {
            let counts = self.lock_retry_counts();
            counts.get(&transfer.id).copied().unwrap_or(0)
        };
        if attempts < self.settings.max_retry_attempts {
            let attempt = attempts + 1;
            match self.provider.retry_transfer(transfer.id).await {
                Ok(_) => {
                    let _ = self
                        .lock_retry_counts()
                        .insert(transfer.id, attempt);
                    info!(
                        transfer_id = transfer.id,
                        attempt,
                        budget = self.settings.max_retry_attempts,
                        "retrying errored transfer"
                    );
                    let _ = self.events.publish(Event::TransferRetried {
                        transfer_id: transfer.id,
                        attempt,
                    });
                }
                Err(err) => {
                    warn!(
                        transfer_id = transfer.id,
                        error = %err,
                        "remote retry request failed"
                    );
                }
            }
            return;
        }

        warn!(
            transfer_id = transfer.id,
            attempts, "retry budget exhausted; deleting errored transfer"
        );
        match self.provider.delete_transfer(transfer.id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(
                    transfer_id = transfer.id,
                    error = %err,
                    "failed to delete errored transfer"
                );
                return;
            }
        }
        let _ = self.lock_retry_counts().remove(&transfer.id);
        self.cache.remove(transfer.id);
        let _ = self.events.publish(Event::TransferRemoved {
            transfer_id: transfer.id,
        });
    }

    /// Re-queue files of tracked, still-downloading transfers that have no
    /// worker: stall aborts and daemon restarts land here. Counters are not
    /// touched; ingestion and the workers account every file exactly once.
    async fn resume_tracked(&self) {
        let mut downloading: Vec<Arc<TransferContext>> = Vec::new();
        self.coordinator.for_each(|ctx| {
            if ctx.phase() == TransferPhase::Downloading {
                downloading.push(Arc::clone(ctx));
            }
        });

        for ctx in downloading {
            if ctx.completed_files() + ctx.failed_files() >= ctx.total_files
                || ctx.root_file_id == 0
            {
                continue;
            }
            let entries = match self.provider.all_transfer_files(ctx.root_file_id).await {
                Ok(entries) => entries,
                Err(err) if err.is_not_found() => {
                    let err = EngineError::provider("all_transfer_files", err);
                    if let Err(fail_err) = self.coordinator.fail_transfer(ctx.id, &err).await {
                        debug!(transfer_id = ctx.id, error = %fail_err, "resume cleanup raced");
                    }
                    continue;
                }
                Err(err) => {
                    warn!(
                        transfer_id = ctx.id,
                        error = %err,
                        "failed to enumerate files for resume"
                    );
                    continue;
                }
            };
            for entry in &entries {
                let target = self.target_for(&ctx.name, &entry.relative_path);
                if file_matches_size(&target, entry.file.size).await
                    || self.pool.is_active(entry.file.id)
                {
                    continue;
                }
                debug!(
                    transfer_id = ctx.id,
                    file_id = entry.file.id,
                    path = %entry.relative_path.display(),
                    "re-queueing file without a worker"
                );
                self.enqueue_entry(ctx.id, &ctx.name, entry).await;
            }
        }
    }

    /// Drive settled transfers to `Processed`, even when the completion
    /// callback that should have done it was missed.
    async fn finalize_tracked(&self) {
        let mut candidates: Vec<u64> = Vec::new();
        self.coordinator.for_each(|ctx| {
            let phase = ctx.phase();
            if phase == TransferPhase::Downloading || phase == TransferPhase::Completed {
                candidates.push(ctx.id);
            }
        });
        for id in candidates {
            if self.coordinator.try_finish(id) {
                self.finalize(id).await;
            }
        }
    }

    async fn finalize(&self, transfer_id: u64) {
        if let Err(err) = self.coordinator.complete_transfer(transfer_id).await {
            debug!(
                transfer_id,
                error = %err,
                "finalisation raced with another caller"
            );
        }
    }

    async fn enqueue_entry(&self, transfer_id: u64, name: &str, entry: &TransferEntry) {
        let job = DownloadJob {
            transfer_id,
            file_id: entry.file.id,
            relative_path: Path::new(name).join(&entry.relative_path),
        };
        match self.pool.enqueue(job).await {
            EnqueueOutcome::Enqueued => {}
            EnqueueOutcome::Duplicate => {
                debug!(
                    transfer_id,
                    file_id = entry.file.id,
                    "file already queued; skipping"
                );
            }
            EnqueueOutcome::Draining => {
                debug!(
                    transfer_id,
                    file_id = entry.file.id,
                    "pool draining; job dropped"
                );
            }
        }
    }

    fn is_over_seeded(&self, transfer: &Transfer) -> bool {
        transfer.status.is_seeding()
            && Duration::from_secs(transfer.seconds_seeding) >= self.settings.seeding_time_threshold
    }

    fn target_for(&self, transfer_name: &str, relative_path: &Path) -> PathBuf {
        self.settings
            .target_dir
            .join(transfer_name)
            .join(relative_path)
    }

    /// Log how many interrupted downloads are waiting to resume.
    fn log_resumable_partials(&self) {
        let mut count = 0_usize;
        let mut bytes = 0_u64;
        for entry in WalkDir::new(&self.settings.target_dir)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == crate::PARTIAL_SUFFIX)
            {
                count += 1;
                bytes += entry.metadata().map_or(0, |meta| meta.len());
            }
        }
        if count > 0 {
            info!(count, bytes, "found partial downloads eligible for resume");
        }
    }

    fn lock_retry_counts(&self) -> MutexGuard<'_, HashMap<u64, u32>> {
        match self.retry_counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("retry count mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

async fn file_matches_size(target: &Path, size: u64) -> bool {
    tokio::fs::metadata(target)
        .await
        .map(|meta| meta.is_file() && meta.len() == size)
        .unwrap_or(false)
}
