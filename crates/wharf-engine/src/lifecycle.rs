//! Start/stop orchestration for the engine.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wharf_events::EventBus;
use wharf_provider::ProviderClient;

use crate::cache::TransferCache;
use crate::categories::CategoryStore;
use crate::coordinator::TransferCoordinator;
use crate::download::Downloader;
use crate::error::EngineResult;
use crate::facade::BridgeFacade;
use crate::pool::{DownloadPool, PoolDeps};
use crate::progress::ProgressCalculator;
use crate::reconciler::TransferProcessor;
use crate::settings::EngineSettings;

#[derive(Default)]
struct RuntimeState {
    started: bool,
    stopped: bool,
    workers: Vec<JoinHandle<()>>,
    reconciler: Option<JoinHandle<()>>,
}

/// Owns every engine component and the root cancellation token.
///
/// The engine is a process-wide service handle: construct it once, pass the
/// `Arc` around, and derive consumer surfaces through [`Engine::facade`].
pub struct Engine {
    settings: EngineSettings,
    provider: Arc<dyn ProviderClient>,
    events: EventBus,
    coordinator: Arc<TransferCoordinator>,
    cache: Arc<TransferCache>,
    progress: Arc<ProgressCalculator>,
    categories: Arc<CategoryStore>,
    pool: Arc<DownloadPool>,
    processor: Arc<TransferProcessor>,
    shutdown: CancellationToken,
    runtime: tokio::sync::Mutex<RuntimeState>,
}

impl Engine {
    /// Wire the engine components together. Nothing runs until
    /// [`Engine::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error when the download HTTP client cannot be built.
    pub fn new(
        settings: EngineSettings,
        provider: Arc<dyn ProviderClient>,
        events: EventBus,
    ) -> EngineResult<Arc<Self>> {
        let shutdown = CancellationToken::new();
        let progress = Arc::new(ProgressCalculator::new());
        let cache = Arc::new(TransferCache::new(
            Arc::clone(&provider),
            Arc::clone(&progress),
            events.clone(),
            settings.cache_update_interval,
        ));
        let coordinator = Arc::new(TransferCoordinator::new(events.clone()));
        let categories = Arc::new(CategoryStore::new(&settings.target_dir));

        let sink = {
            let cache = Arc::clone(&cache);
            Arc::new(move |transfer_id, downloaded| {
                cache.update_progress(transfer_id, downloaded);
            })
        };
        let downloader = Downloader::new(&settings, sink)?;
        let pool = Arc::new(DownloadPool::new(
            PoolDeps {
                provider: Arc::clone(&provider),
                coordinator: Arc::clone(&coordinator),
                events: events.clone(),
                downloader,
                target_dir: settings.target_dir.clone(),
            },
            settings.effective_worker_count(),
            shutdown.clone(),
        ));
        let processor = TransferProcessor::new(
            Arc::clone(&provider),
            Arc::clone(&coordinator),
            Arc::clone(&cache),
            Arc::clone(&pool),
            events.clone(),
            settings.clone(),
        );

        Ok(Arc::new(Self {
            settings,
            provider,
            events,
            coordinator,
            cache,
            progress,
            categories,
            pool,
            processor,
            shutdown,
            runtime: tokio::sync::Mutex::new(RuntimeState::default()),
        }))
    }

    /// Bring up the reconciler and the worker pool. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error when the target directory cannot be created.
    pub async fn start(&self) -> EngineResult<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.started {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.settings.target_dir)
            .await
            .map_err(|source| {
                crate::error::EngineError::io(
                    "engine.create_target_dir",
                    &self.settings.target_dir,
                    source,
                )
            })?;
        if let Err(err) = self.categories.load() {
            warn!(error = %err, "category state unavailable; starting empty");
        }

        runtime.workers = self.pool.spawn_workers();
        runtime.reconciler = Some(tokio::spawn(
            Arc::clone(&self.processor).run(self.shutdown.clone()),
        ));
        runtime.started = true;
        info!(
            workers = self.settings.effective_worker_count(),
            folder_id = self.settings.folder_id,
            target_dir = %self.settings.target_dir.display(),
            "engine started"
        );
        Ok(())
    }

    /// Broadcast shutdown, drain the job channel, and join every task.
    /// Idempotent; in-flight downloads close cleanly and keep their partial
    /// files for the next run.
    pub async fn stop(&self) {
        let mut runtime = self.runtime.lock().await;
        if runtime.stopped || !runtime.started {
            return;
        }
        self.shutdown.cancel();

        for handle in runtime.workers.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "download worker join failed");
            }
        }
        self.pool.drain().await;
        if let Some(handle) = runtime.reconciler.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "reconciler join failed");
            }
        }

        runtime.stopped = true;
        info!("engine stopped");
    }

    /// Build the downstream surface handed to the RPC front-end.
    #[must_use]
    pub fn facade(self: &Arc<Self>) -> BridgeFacade {
        BridgeFacade::new(
            Arc::clone(self),
            Arc::clone(&self.provider),
            Arc::clone(&self.cache),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.progress),
            Arc::clone(&self.categories),
            self.events.clone(),
            self.settings.folder_id,
            self.settings.target_dir.clone(),
        )
    }

    /// Coordinator handle, mainly for inspection in tests and adapters.
    #[must_use]
    pub fn coordinator(&self) -> Arc<TransferCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Transfer cache handle.
    #[must_use]
    pub fn cache(&self) -> Arc<TransferCache> {
        Arc::clone(&self.cache)
    }
}
