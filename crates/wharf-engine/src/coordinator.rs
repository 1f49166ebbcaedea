//! Per-transfer state machine and terminal-outcome accounting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use tracing::{debug, error, info, warn};
use wharf_events::{Event, EventBus};

use crate::context::{TransferContext, TransferPhase};
use crate::error::{EngineError, EngineResult, chain_text};

/// Cleanup hook invoked for a transfer after local completion or permanent
/// failure. Hook errors are captured and logged, never propagated.
pub(crate) type CleanupHook =
    dyn Fn(u64) -> BoxFuture<'static, EngineResult<()>> + Send + Sync + 'static;

type ProcessedCallback = Arc<dyn Fn(u64) + Send + Sync + 'static>;

/// Owns the tracked-transfer map and drives every lifecycle transition.
pub struct TransferCoordinator {
    contexts: Mutex<HashMap<u64, Arc<TransferContext>>>,
    hooks: Mutex<Vec<Arc<CleanupHook>>>,
    on_processed: Mutex<Option<ProcessedCallback>>,
    events: EventBus,
}

impl TransferCoordinator {
    /// Construct a coordinator publishing onto the given bus.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            hooks: Mutex::new(Vec::new()),
            on_processed: Mutex::new(None),
            events,
        }
    }

    /// Begin tracking a transfer. Idempotent: a second call for a known id
    /// returns the existing context untouched.
    pub fn initiate_transfer(
        &self,
        id: u64,
        name: &str,
        root_file_id: u64,
        total_files: u64,
    ) -> Arc<TransferContext> {
        let mut contexts = self.lock_contexts();
        if let Some(existing) = contexts.get(&id) {
            return Arc::clone(existing);
        }
        let ctx = Arc::new(TransferContext::new(id, name, root_file_id, total_files));
        contexts.insert(id, Arc::clone(&ctx));
        drop(contexts);
        info!(transfer_id = id, name, total_files, "tracking transfer");
        let _ = self.events.publish(Event::TransferTracked {
            transfer_id: id,
            name: name.to_string(),
            total_files,
        });
        ctx
    }

    /// Move a transfer from `Initial` to `Downloading`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TransferNotFound`] for unknown ids and
    /// [`EngineError::InvalidTransition`] from any phase but `Initial`.
    pub fn start_download(&self, id: u64) -> EngineResult<()> {
        let ctx = self
            .get(id)
            .ok_or(EngineError::TransferNotFound { transfer_id: id })?;
        {
            let mut state = ctx.lock_state();
            if state.phase != TransferPhase::Initial {
                return Err(EngineError::InvalidTransition {
                    transfer_id: id,
                    from: state.phase.as_str(),
                    to: TransferPhase::Downloading.as_str(),
                });
            }
            state.phase = TransferPhase::Downloading;
        }
        let _ = self
            .events
            .publish(Event::DownloadStarted { transfer_id: id });
        Ok(())
    }

    /// Record one file's local completion.
    ///
    /// Unknown ids succeed silently (the transfer may have been finalised
    /// already) and completed/processed transfers treat the call as an
    /// idempotent no-op. Any other phase but `Downloading` rejects the
    /// notification. When the last outstanding file completes without
    /// failures the transfer moves to `Completed`; cleanup only runs later,
    /// in [`Self::complete_transfer`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless the transfer is
    /// downloading.
    pub fn file_completed(&self, id: u64) -> EngineResult<()> {
        let Some(ctx) = self.get(id) else {
            return Ok(());
        };
        let mut state = ctx.lock_state();
        match state.phase {
            TransferPhase::Completed | TransferPhase::Processed => Ok(()),
            TransferPhase::Downloading => {
                let completed = ctx.increment_completed();
                let failed = ctx.failed_files();
                if completed + failed >= ctx.total_files && failed == 0 {
                    state.phase = TransferPhase::Completed;
                    drop(state);
                    let _ = self
                        .events
                        .publish(Event::TransferCompleted { transfer_id: id });
                }
                Ok(())
            }
            TransferPhase::Failed | TransferPhase::Cancelled | TransferPhase::Initial => {
                Err(EngineError::InvalidTransition {
                    transfer_id: id,
                    from: state.phase.as_str(),
                    to: TransferPhase::Completed.as_str(),
                })
            }
        }
    }

    /// Record one file's permanent failure. The first failure moves a
    /// downloading transfer to `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless the transfer is
    /// downloading.
    pub fn file_failure(&self, id: u64, message: &str) -> EngineResult<()> {
        let Some(ctx) = self.get(id) else {
            return Ok(());
        };
        let mut state = ctx.lock_state();
        match state.phase {
            TransferPhase::Completed | TransferPhase::Processed => Ok(()),
            TransferPhase::Downloading => {
                let _ = ctx.increment_failed();
                state.last_error = Some(message.to_string());
                state.phase = TransferPhase::Failed;
                drop(state);
                let _ = self.events.publish(Event::TransferFailed {
                    transfer_id: id,
                    message: message.to_string(),
                });
                Ok(())
            }
            TransferPhase::Failed | TransferPhase::Cancelled | TransferPhase::Initial => {
                Err(EngineError::InvalidTransition {
                    transfer_id: id,
                    from: state.phase.as_str(),
                    to: TransferPhase::Failed.as_str(),
                })
            }
        }
    }

    /// Move a `Downloading` transfer whose counters are settled (all files
    /// accounted for, none failed) to `Completed`. Returns whether the
    /// transfer is now in `Completed`.
    pub fn try_finish(&self, id: u64) -> bool {
        let Some(ctx) = self.get(id) else {
            return false;
        };
        let mut state = ctx.lock_state();
        match state.phase {
            TransferPhase::Completed => true,
            TransferPhase::Downloading => {
                let completed = ctx.completed_files();
                let failed = ctx.failed_files();
                if completed + failed >= ctx.total_files && failed == 0 {
                    state.phase = TransferPhase::Completed;
                    drop(state);
                    let _ = self
                        .events
                        .publish(Event::TransferCompleted { transfer_id: id });
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Finalise a `Completed` transfer: run cleanup hooks in registration
    /// order, flip to `Processed`, fire the processed callback, and drop the
    /// context from the tracking map.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TransferNotFound`] for unknown ids and
    /// [`EngineError::InvalidTransition`] unless the transfer is in
    /// `Completed` (and not already finalising).
    pub async fn complete_transfer(&self, id: u64) -> EngineResult<()> {
        let ctx = self
            .get(id)
            .ok_or(EngineError::TransferNotFound { transfer_id: id })?;
        {
            let mut state = ctx.lock_state();
            if state.phase != TransferPhase::Completed || state.finalizing {
                return Err(EngineError::InvalidTransition {
                    transfer_id: id,
                    from: state.phase.as_str(),
                    to: TransferPhase::Processed.as_str(),
                });
            }
            state.finalizing = true;
        }

        self.run_cleanup_hooks(id).await;

        {
            let mut state = ctx.lock_state();
            state.phase = TransferPhase::Processed;
        }
        info!(transfer_id = id, name = %ctx.name, "transfer processed");
        let _ = self
            .events
            .publish(Event::TransferProcessed { transfer_id: id });

        let callback = self.lock_on_processed().clone();
        if let Some(callback) = callback {
            callback(id);
        }

        self.remove_context(id);
        Ok(())
    }

    /// Abort tracking for a transfer. Cancellation-kind errors record the
    /// detail and park the context in `Cancelled` without running cleanup;
    /// everything else moves to `Failed`, runs the cleanup hooks, and drops
    /// the context.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TransferNotFound`] for unknown ids.
    pub async fn fail_transfer(&self, id: u64, error: &EngineError) -> EngineResult<()> {
        let ctx = self
            .get(id)
            .ok_or(EngineError::TransferNotFound { transfer_id: id })?;
        let message = chain_text(error);

        if error.is_cancellation() {
            {
                let mut state = ctx.lock_state();
                state.phase = TransferPhase::Cancelled;
                state.last_error = Some(message.clone());
            }
            debug!(transfer_id = id, detail = %message, "transfer cancelled");
            let _ = self.events.publish(Event::TransferCancelled {
                transfer_id: id,
                message,
            });
            return Ok(());
        }

        {
            let mut state = ctx.lock_state();
            state.phase = TransferPhase::Failed;
            state.last_error = Some(message.clone());
        }
        warn!(transfer_id = id, detail = %message, "transfer failed");
        let _ = self.events.publish(Event::TransferFailed {
            transfer_id: id,
            message,
        });

        self.run_cleanup_hooks(id).await;
        self.remove_context(id);
        Ok(())
    }

    /// Append a cleanup hook. Hooks run on [`Self::complete_transfer`] and
    /// on non-cancellation [`Self::fail_transfer`], in registration order.
    pub fn register_cleanup_hook<F>(&self, hook: F)
    where
        F: Fn(u64) -> BoxFuture<'static, EngineResult<()>> + Send + Sync + 'static,
    {
        self.lock_hooks().push(Arc::new(hook));
    }

    /// Install the callback fired after a transfer reaches `Processed`.
    pub fn set_on_processed<F>(&self, callback: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        *self.lock_on_processed() = Some(Arc::new(callback));
    }

    /// Fetch the tracked context for a transfer.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<TransferContext>> {
        self.lock_contexts().get(&id).cloned()
    }

    /// Whether a context exists for the transfer.
    #[must_use]
    pub fn is_tracked(&self, id: u64) -> bool {
        self.lock_contexts().contains_key(&id)
    }

    /// Visit every tracked context.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<TransferContext>),
    {
        let contexts: Vec<Arc<TransferContext>> = self.lock_contexts().values().cloned().collect();
        for ctx in &contexts {
            visitor(ctx);
        }
    }

    /// Drop a context without running any lifecycle logic.
    pub(crate) fn remove_context(&self, id: u64) {
        let _ = self.lock_contexts().remove(&id);
    }

    async fn run_cleanup_hooks(&self, id: u64) {
        let hooks: Vec<Arc<CleanupHook>> = self.lock_hooks().clone();
        for (index, hook) in hooks.iter().enumerate() {
            if let Err(err) = hook(id).await {
                warn!(
                    transfer_id = id,
                    hook = index,
                    error = %err,
                    "cleanup hook failed"
                );
            }
        }
    }

    fn lock_contexts(&self) -> MutexGuard<'_, HashMap<u64, Arc<TransferContext>>> {
        match self.contexts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("coordinator context map mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn lock_hooks(&self) -> MutexGuard<'_, Vec<Arc<CleanupHook>>> {
        match self.hooks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("coordinator hook list mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn lock_on_processed(&self) -> MutexGuard<'_, Option<ProcessedCallback>> {
        match self.on_processed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("coordinator callback mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CancelReason;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn coordinator() -> TransferCoordinator {
        TransferCoordinator::new(EventBus::with_capacity(64))
    }

    #[test]
    fn initiate_is_idempotent() {
        let coordinator = coordinator();
        let first = coordinator.initiate_transfer(1, "demo", 10, 3);
        let second = coordinator.initiate_transfer(1, "other-name", 99, 7);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.name, "demo");
        assert_eq!(second.total_files, 3);
    }

    #[test]
    fn start_download_requires_initial_phase() {
        let coordinator = coordinator();
        let _ = coordinator.initiate_transfer(1, "demo", 10, 3);
        coordinator.start_download(1).expect("initial start");

        let err = coordinator.start_download(1).expect_err("double start");
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: "downloading",
                ..
            }
        ));

        let missing = coordinator.start_download(2).expect_err("unknown id");
        assert!(matches!(missing, EngineError::TransferNotFound { .. }));
    }

    #[tokio::test]
    async fn happy_path_three_files_reaches_processed() {
        let coordinator = Arc::new(coordinator());
        let hook_calls = Arc::new(AtomicU64::new(0));
        let processed = Arc::new(AtomicU64::new(0));

        {
            let hook_calls = Arc::clone(&hook_calls);
            coordinator.register_cleanup_hook(move |_id| {
                let hook_calls = Arc::clone(&hook_calls);
                async move {
                    hook_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            });
        }
        {
            let processed = Arc::clone(&processed);
            coordinator.set_on_processed(move |id| {
                processed.store(id, Ordering::SeqCst);
            });
        }

        let ctx = coordinator.initiate_transfer(1, "demo", 10, 3);
        coordinator.start_download(1).expect("start");
        for _ in 0..3 {
            coordinator.file_completed(1).expect("file completion");
        }
        assert_eq!(ctx.phase(), TransferPhase::Completed);

        coordinator.complete_transfer(1).await.expect("finalise");
        assert_eq!(ctx.phase(), TransferPhase::Processed);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(processed.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_tracked(1), "context must be removed");
    }

    #[tokio::test]
    async fn partial_failure_flips_to_failed_and_keeps_counters() {
        let coordinator = coordinator();
        let ctx = coordinator.initiate_transfer(1, "demo", 10, 3);
        coordinator.start_download(1).expect("start");

        coordinator.file_completed(1).expect("first completion");
        coordinator.file_completed(1).expect("second completion");
        coordinator.file_failure(1, "http 500").expect("failure");
        assert_eq!(ctx.phase(), TransferPhase::Failed);
        assert_eq!(ctx.completed_files(), 2);
        assert_eq!(ctx.failed_files(), 1);
        assert_eq!(ctx.last_error().as_deref(), Some("http 500"));

        // Once failed, further notifications are rejected, not accounted.
        let late = coordinator.file_completed(1).expect_err("late completion");
        assert!(matches!(late, EngineError::InvalidTransition { .. }));
        assert_eq!(ctx.completed_files(), 2);
    }

    #[tokio::test]
    async fn cancellation_keeps_context_and_skips_hooks() {
        let coordinator = Arc::new(coordinator());
        let hook_calls = Arc::new(AtomicU64::new(0));
        {
            let hook_calls = Arc::clone(&hook_calls);
            coordinator.register_cleanup_hook(move |_id| {
                let hook_calls = Arc::clone(&hook_calls);
                async move {
                    hook_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            });
        }

        let ctx = coordinator.initiate_transfer(1, "demo", 10, 2);
        coordinator.start_download(1).expect("start");

        let cancel = EngineError::DownloadCancelled {
            file_id: 7,
            reason: CancelReason::Shutdown,
        };
        coordinator.fail_transfer(1, &cancel).await.expect("cancel");

        assert_eq!(ctx.phase(), TransferPhase::Cancelled);
        assert!(ctx.last_error().is_some());
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0, "hooks must not run");
        assert!(coordinator.is_tracked(1), "context stays for cancellation");
    }

    #[tokio::test]
    async fn non_cancellation_failure_runs_hooks_and_forgets() {
        let coordinator = Arc::new(coordinator());
        let hook_calls = Arc::new(AtomicU64::new(0));
        {
            let hook_calls = Arc::clone(&hook_calls);
            coordinator.register_cleanup_hook(move |_id| {
                let hook_calls = Arc::clone(&hook_calls);
                async move {
                    hook_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            });
        }

        let _ = coordinator.initiate_transfer(1, "demo", 10, 2);
        coordinator.start_download(1).expect("start");
        let err = EngineError::NoFilesFound { transfer_id: 1 };
        coordinator.fail_transfer(1, &err).await.expect("fail");

        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_tracked(1));
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order_despite_failures() {
        let coordinator = Arc::new(coordinator());
        let order = Arc::new(Mutex::new(Vec::new()));
        for index in 0..3_u64 {
            let order = Arc::clone(&order);
            coordinator.register_cleanup_hook(move |_id| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().expect("order lock").push(index);
                    if index == 1 {
                        Err(EngineError::NoFilesFound { transfer_id: 0 })
                    } else {
                        Ok(())
                    }
                }
                .boxed()
            });
        }

        let _ = coordinator.initiate_transfer(1, "demo", 10, 1);
        coordinator.start_download(1).expect("start");
        coordinator.file_completed(1).expect("completion");
        coordinator.complete_transfer(1).await.expect("finalise");

        assert_eq!(*order.lock().expect("order lock"), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn complete_transfer_requires_completed_phase() {
        let coordinator = coordinator();
        let _ = coordinator.initiate_transfer(1, "demo", 10, 2);
        coordinator.start_download(1).expect("start");

        let err = coordinator
            .complete_transfer(1)
            .await
            .expect_err("premature completion");
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        let missing = coordinator
            .complete_transfer(9)
            .await
            .expect_err("unknown id");
        assert!(matches!(missing, EngineError::TransferNotFound { .. }));
    }

    #[test]
    fn file_completed_is_idempotent_once_completed() {
        let coordinator = coordinator();
        let ctx = coordinator.initiate_transfer(1, "demo", 10, 1);
        coordinator.start_download(1).expect("start");
        coordinator.file_completed(1).expect("completion");
        assert_eq!(ctx.phase(), TransferPhase::Completed);

        // Extra notifications no longer move the counters.
        coordinator.file_completed(1).expect("idempotent completion");
        coordinator.file_failure(1, "late").expect("idempotent failure");
        assert_eq!(ctx.completed_files(), 1);
        assert_eq!(ctx.failed_files(), 0);
    }

    #[test]
    fn file_outcomes_for_unknown_ids_are_ok() {
        let coordinator = coordinator();
        coordinator.file_completed(42).expect("unknown completion");
        coordinator.file_failure(42, "x").expect("unknown failure");
    }

    #[test]
    fn file_outcomes_before_start_are_rejected() {
        let coordinator = coordinator();
        let _ = coordinator.initiate_transfer(1, "demo", 10, 1);
        assert!(coordinator.file_completed(1).is_err());
        assert!(coordinator.file_failure(1, "x").is_err());
    }

    #[test]
    fn try_finish_handles_zero_file_transfers() {
        let coordinator = coordinator();
        let _ = coordinator.initiate_transfer(1, "demo", 0, 0);
        coordinator.start_download(1).expect("start");
        assert!(coordinator.try_finish(1));
        assert!(coordinator.try_finish(1), "already completed stays true");
    }

    #[test]
    fn try_finish_rejects_pending_counters() {
        let coordinator = coordinator();
        let _ = coordinator.initiate_transfer(1, "demo", 10, 2);
        coordinator.start_download(1).expect("start");
        coordinator.file_completed(1).expect("completion");
        assert!(!coordinator.try_finish(1));
    }
}
