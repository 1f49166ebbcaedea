//! Bounded worker pool draining download jobs.
//!
//! Producers reserve a file id in the active set and then publish to the
//! bounded job channel; a process-wide producer lock makes that sequence
//! atomic against shutdown, while the active set itself stays a cheap
//! mutex the workers can touch without contending with a blocked producer.
//! Workers share the receiver and report terminal outcomes to the
//! coordinator.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wharf_events::{Event, EventBus};
use wharf_provider::ProviderClient;

use crate::coordinator::TransferCoordinator;
use crate::download::{DownloadRequest, Downloader, FetchOutcome};
use crate::error::{CancelReason, EngineError, EngineResult, chain_text};

/// Job-channel slots per worker.
const QUEUE_DEPTH_PER_WORKER: usize = 2;
/// Retry budget for resolving a download URL.
const URL_ATTEMPTS: u32 = 3;
/// Linear backoff step between URL resolution attempts.
const URL_BACKOFF_STEP: Duration = Duration::from_secs(1);

/// One file to download, relative to the target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// Remote transfer the file belongs to.
    pub transfer_id: u64,
    /// Remote file node to fetch.
    pub file_id: u64,
    /// Destination path relative to the target directory.
    pub relative_path: PathBuf,
}

/// Result of attempting to enqueue a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The job was published to the channel.
    Enqueued,
    /// The file id is already enqueued or in flight; the job was dropped.
    Duplicate,
    /// The lifecycle is shutting down; the job was dropped.
    Draining,
}

/// Shared dependencies available to every worker.
pub(crate) struct PoolDeps {
    pub(crate) provider: Arc<dyn ProviderClient>,
    pub(crate) coordinator: Arc<TransferCoordinator>,
    pub(crate) events: EventBus,
    pub(crate) downloader: Downloader,
    pub(crate) target_dir: PathBuf,
}

/// Fixed-size pool of download workers fed by a bounded channel.
pub struct DownloadPool {
    deps: Arc<PoolDeps>,
    active: Arc<StdMutex<HashSet<u64>>>,
    producer: Mutex<()>,
    jobs_tx: mpsc::Sender<DownloadJob>,
    jobs_rx: Arc<Mutex<mpsc::Receiver<DownloadJob>>>,
    shutdown: CancellationToken,
    worker_count: usize,
}

impl DownloadPool {
    /// Construct a pool with `worker_count` workers (floored at one).
    pub(crate) fn new(deps: PoolDeps, worker_count: usize, shutdown: CancellationToken) -> Self {
        let worker_count = worker_count.max(1);
        let (jobs_tx, jobs_rx) = mpsc::channel(worker_count * QUEUE_DEPTH_PER_WORKER);
        Self {
            deps: Arc::new(deps),
            active: Arc::new(StdMutex::new(HashSet::new())),
            producer: Mutex::new(()),
            jobs_tx,
            jobs_rx: Arc::new(Mutex::new(jobs_rx)),
            shutdown,
            worker_count,
        }
    }

    /// Publish a job unless its file id is already active. The active-set
    /// reservation and the channel publish run under the producer lock so
    /// shutdown never observes a half-enqueued job; a reservation rolled
    /// back by shutdown leaves no trace.
    pub async fn enqueue(&self, job: DownloadJob) -> EnqueueOutcome {
        let _producer = self.producer.lock().await;
        if self.shutdown.is_cancelled() {
            return EnqueueOutcome::Draining;
        }
        let file_id = job.file_id;
        if !lock_set(&self.active).insert(file_id) {
            return EnqueueOutcome::Duplicate;
        }
        tokio::select! {
            () = self.shutdown.cancelled() => {
                let _ = lock_set(&self.active).remove(&file_id);
                EnqueueOutcome::Draining
            }
            sent = self.jobs_tx.send(job) => {
                if sent.is_err() {
                    let _ = lock_set(&self.active).remove(&file_id);
                    EnqueueOutcome::Draining
                } else {
                    EnqueueOutcome::Enqueued
                }
            }
        }
    }

    /// Whether a file id is currently enqueued or in flight.
    #[must_use]
    pub fn is_active(&self, file_id: u64) -> bool {
        lock_set(&self.active).contains(&file_id)
    }

    /// Spawn the worker tasks. Called once by the lifecycle manager.
    pub(crate) fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.worker_count)
            .map(|worker| {
                let deps = Arc::clone(&self.deps);
                let active = Arc::clone(&self.active);
                let jobs_rx = Arc::clone(&self.jobs_rx);
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    debug!(worker, "download worker started");
                    loop {
                        let job = {
                            let mut rx = jobs_rx.lock().await;
                            tokio::select! {
                                () = shutdown.cancelled() => None,
                                job = rx.recv() => job,
                            }
                        };
                        let Some(job) = job else { break };
                        Self::process(&deps, &shutdown, &job, worker).await;
                        let _ = lock_set(&active).remove(&job.file_id);
                    }
                    debug!(worker, "download worker stopped");
                })
            })
            .collect()
    }

    /// Discard queued jobs and clear the active set after workers joined.
    pub(crate) async fn drain(&self) {
        let mut rx = self.jobs_rx.lock().await;
        while let Ok(job) = rx.try_recv() {
            let _ = lock_set(&self.active).remove(&job.file_id);
        }
        lock_set(&self.active).clear();
    }

    async fn process(
        deps: &Arc<PoolDeps>,
        shutdown: &CancellationToken,
        job: &DownloadJob,
        worker: usize,
    ) {
        let Some(ctx) = deps.coordinator.get(job.transfer_id) else {
            debug!(
                worker,
                transfer_id = job.transfer_id,
                file_id = job.file_id,
                "transfer no longer tracked; dropping job"
            );
            return;
        };

        let url = match Self::resolve_url(deps, shutdown, job.file_id).await {
            Ok(url) => url,
            Err(err) if err.is_cancellation() => return,
            Err(err) if err.is_remote_vanished() => {
                // The remote file is gone; clean the whole transfer up.
                warn!(
                    transfer_id = job.transfer_id,
                    file_id = job.file_id,
                    "remote file vanished; cleaning up transfer"
                );
                if let Err(fail_err) = deps.coordinator.fail_transfer(job.transfer_id, &err).await {
                    debug!(
                        transfer_id = job.transfer_id,
                        error = %fail_err,
                        "cleanup after vanished file was already handled"
                    );
                }
                return;
            }
            Err(err) => {
                Self::report_failure(deps, job, &err);
                return;
            }
        };

        let request = DownloadRequest {
            transfer_id: job.transfer_id,
            file_id: job.file_id,
            url,
            target: deps.target_dir.join(&job.relative_path),
            ctx: Arc::clone(&ctx),
            cancel: shutdown.child_token(),
        };

        match deps.downloader.run(&request).await {
            Ok(FetchOutcome::Completed { bytes }) => {
                info!(
                    worker,
                    transfer_id = job.transfer_id,
                    file_id = job.file_id,
                    bytes,
                    path = %job.relative_path.display(),
                    "file downloaded"
                );
                let _ = deps.events.publish(Event::FileCompleted {
                    transfer_id: job.transfer_id,
                    file_id: job.file_id,
                });
                if let Err(err) = deps.coordinator.file_completed(job.transfer_id) {
                    debug!(
                        transfer_id = job.transfer_id,
                        error = %err,
                        "completion notification rejected"
                    );
                }
            }
            Ok(FetchOutcome::Cancelled(reason)) => {
                debug!(
                    worker,
                    transfer_id = job.transfer_id,
                    file_id = job.file_id,
                    reason = reason.as_str(),
                    "download cancelled; partial file kept for the next pass"
                );
            }
            Err(err) => Self::report_failure(deps, job, &err),
        }
    }

    fn report_failure(deps: &Arc<PoolDeps>, job: &DownloadJob, err: &EngineError) {
        let message = chain_text(err);
        warn!(
            transfer_id = job.transfer_id,
            file_id = job.file_id,
            detail = %message,
            "file download failed permanently"
        );
        let _ = deps.events.publish(Event::FileFailed {
            transfer_id: job.transfer_id,
            file_id: job.file_id,
            message: message.clone(),
        });
        if let Err(err) = deps.coordinator.file_failure(job.transfer_id, &message) {
            debug!(
                transfer_id = job.transfer_id,
                error = %err,
                "failure notification rejected"
            );
        }
    }

    async fn resolve_url(
        deps: &Arc<PoolDeps>,
        shutdown: &CancellationToken,
        file_id: u64,
    ) -> EngineResult<String> {
        let mut attempt = 1;
        loop {
            match deps.provider.download_url(file_id).await {
                Ok(url) => return Ok(url),
                Err(source) => {
                    let err = EngineError::provider("download_url", source);
                    if attempt >= URL_ATTEMPTS || !err.is_retryable() {
                        return Err(err);
                    }
                    let delay = URL_BACKOFF_STEP * attempt;
                    debug!(
                        file_id,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "retrying download url resolution"
                    );
                    tokio::select! {
                        () = shutdown.cancelled() => {
                            return Err(EngineError::DownloadCancelled {
                                file_id,
                                reason: CancelReason::Shutdown,
                            });
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

fn lock_set(set: &StdMutex<HashSet<u64>>) -> MutexGuard<'_, HashSet<u64>> {
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!("active file set mutex poisoned; continuing with recovered guard");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EngineSettings;
    use async_trait::async_trait;
    use wharf_provider::{AccountInfo, ProviderResult, RemoteFile, Transfer};

    struct NullProvider;

    #[async_trait]
    impl ProviderClient for NullProvider {
        async fn account_info(&self) -> ProviderResult<AccountInfo> {
            unimplemented!("not used by pool tests")
        }

        async fn list_transfers(&self) -> ProviderResult<Vec<Transfer>> {
            unimplemented!("not used by pool tests")
        }

        async fn add_transfer(&self, _source: &str, _folder_id: u64) -> ProviderResult<Transfer> {
            unimplemented!("not used by pool tests")
        }

        async fn upload_torrent(
            &self,
            _bytes: Vec<u8>,
            _filename: &str,
            _folder_id: u64,
        ) -> ProviderResult<Transfer> {
            unimplemented!("not used by pool tests")
        }

        async fn retry_transfer(&self, _id: u64) -> ProviderResult<Transfer> {
            unimplemented!("not used by pool tests")
        }

        async fn delete_transfer(&self, _id: u64) -> ProviderResult<()> {
            unimplemented!("not used by pool tests")
        }

        async fn list_files(&self, _folder_id: u64) -> ProviderResult<Vec<RemoteFile>> {
            unimplemented!("not used by pool tests")
        }

        async fn get_file(&self, _id: u64) -> ProviderResult<RemoteFile> {
            unimplemented!("not used by pool tests")
        }

        async fn download_url(&self, _file_id: u64) -> ProviderResult<String> {
            unimplemented!("not used by pool tests")
        }

        async fn delete_file(&self, _file_id: u64) -> ProviderResult<()> {
            unimplemented!("not used by pool tests")
        }

        async fn ensure_folder(&self, _name: &str) -> ProviderResult<u64> {
            unimplemented!("not used by pool tests")
        }
    }

    fn pool(shutdown: &CancellationToken) -> DownloadPool {
        let settings = EngineSettings::for_folder("/unused", 0);
        let events = EventBus::with_capacity(16);
        let deps = PoolDeps {
            provider: Arc::new(NullProvider),
            coordinator: Arc::new(TransferCoordinator::new(events.clone())),
            events,
            downloader: Downloader::new(&settings, Arc::new(|_, _| {})).expect("downloader"),
            target_dir: PathBuf::from("/unused"),
        };
        DownloadPool::new(deps, 2, shutdown.clone())
    }

    fn job(file_id: u64) -> DownloadJob {
        DownloadJob {
            transfer_id: 1,
            file_id,
            relative_path: PathBuf::from("demo/file.bin"),
        }
    }

    #[tokio::test]
    async fn enqueue_deduplicates_by_file_id() {
        let shutdown = CancellationToken::new();
        let pool = pool(&shutdown);

        assert_eq!(pool.enqueue(job(7)).await, EnqueueOutcome::Enqueued);
        assert_eq!(pool.enqueue(job(7)).await, EnqueueOutcome::Duplicate);
        assert_eq!(pool.enqueue(job(8)).await, EnqueueOutcome::Enqueued);
        assert!(pool.is_active(7));
        assert!(pool.is_active(8));
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_dropped() {
        let shutdown = CancellationToken::new();
        let pool = pool(&shutdown);
        shutdown.cancel();

        assert_eq!(pool.enqueue(job(7)).await, EnqueueOutcome::Draining);
        assert!(!pool.is_active(7), "reservation must roll back");
    }

    #[tokio::test]
    async fn drain_clears_queued_reservations() {
        let shutdown = CancellationToken::new();
        let pool = pool(&shutdown);
        assert_eq!(pool.enqueue(job(7)).await, EnqueueOutcome::Enqueued);

        shutdown.cancel();
        pool.drain().await;
        assert!(!pool.is_active(7));
    }

    #[tokio::test]
    async fn workers_exit_on_shutdown() {
        let shutdown = CancellationToken::new();
        let pool = pool(&shutdown);
        let workers = pool.spawn_workers();

        shutdown.cancel();
        for handle in workers {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("worker join timed out")
                .expect("worker panicked");
        }
    }
}
