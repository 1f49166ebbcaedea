//! Downstream surface consumed by the Transmission-RPC front-end.
//!
//! The facade is a thin adapter over the engine's components: submissions
//! forward to the Provider, snapshot queries read the transfer cache, and
//! progress queries merge the cached remote view with the tracked local
//! context. Protocol concerns (method dispatch, JSON shapes, session ids)
//! live entirely in the front-end.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use wharf_events::{Event, EventBus};
use wharf_provider::{AccountInfo, ProviderClient, Transfer};

use crate::cache::{CachedTransfer, TransferCache};
use crate::categories::CategoryStore;
use crate::coordinator::TransferCoordinator;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::Engine;
use crate::progress::{ProgressCalculator, ProgressSnapshot};

/// What a consumer wants downloaded.
#[derive(Debug, Clone)]
pub enum SubmitSource {
    /// A magnet URI or remote torrent URL.
    Magnet(String),
    /// Raw torrent metainfo bytes, forwarded verbatim.
    Metainfo {
        /// Bencoded metainfo payload.
        bytes: Vec<u8>,
        /// File name presented to the Provider.
        filename: String,
    },
}

/// Adapter handed to the RPC front-end.
#[derive(Clone)]
pub struct BridgeFacade {
    engine: Arc<Engine>,
    provider: Arc<dyn ProviderClient>,
    cache: Arc<TransferCache>,
    coordinator: Arc<TransferCoordinator>,
    progress: Arc<ProgressCalculator>,
    categories: Arc<CategoryStore>,
    events: EventBus,
    folder_id: u64,
    target_dir: PathBuf,
}

impl BridgeFacade {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        engine: Arc<Engine>,
        provider: Arc<dyn ProviderClient>,
        cache: Arc<TransferCache>,
        coordinator: Arc<TransferCoordinator>,
        progress: Arc<ProgressCalculator>,
        categories: Arc<CategoryStore>,
        events: EventBus,
        folder_id: u64,
        target_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            provider,
            cache,
            coordinator,
            progress,
            categories,
            events,
            folder_id,
            target_dir,
        }
    }

    /// Forward a submission to the Provider and record its category.
    ///
    /// # Errors
    ///
    /// Returns an error when the Provider rejects the submission.
    pub async fn submit(
        &self,
        source: SubmitSource,
        category: Option<&str>,
    ) -> EngineResult<Transfer> {
        let transfer = match source {
            SubmitSource::Magnet(url) => self
                .provider
                .add_transfer(&url, self.folder_id)
                .await
                .map_err(|source| EngineError::provider("add_transfer", source))?,
            SubmitSource::Metainfo { bytes, filename } => self
                .provider
                .upload_torrent(bytes, &filename, self.folder_id)
                .await
                .map_err(|source| EngineError::provider("upload_torrent", source))?,
        };

        if let (Some(category), Some(hash)) = (category, transfer.hash.as_deref()) {
            self.categories.set(hash, category);
        }
        debug!(
            transfer_id = transfer.id,
            name = %transfer.name,
            "submission accepted by provider"
        );
        Ok(transfer)
    }

    /// Snapshot of every cached transfer, refreshing the cache first when
    /// its interval has elapsed. A failed refresh serves the stale view.
    pub async fn transfers(&self) -> Vec<CachedTransfer> {
        if let Err(err) = self.cache.refresh().await {
            warn!(error = %err, "serving stale transfer listing");
        }
        self.cache.snapshots()
    }

    /// Progress projection for a cached transfer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TransferNotFound`] when the id is not cached.
    pub fn progress(&self, transfer_id: u64) -> EngineResult<ProgressSnapshot> {
        let cached = self
            .cache
            .by_id(transfer_id)
            .ok_or(EngineError::TransferNotFound { transfer_id })?;
        Ok(self.progress_for(&cached.transfer))
    }

    /// Progress projection for a remote snapshot the caller already holds.
    #[must_use]
    pub fn progress_for(&self, remote: &Transfer) -> ProgressSnapshot {
        let ctx = self
            .coordinator
            .get(remote.id)
            .map(|ctx| ctx.snapshot());
        self.progress.project(remote, ctx.as_ref())
    }

    /// Category recorded for a hash, when any.
    #[must_use]
    pub fn category(&self, hash: &str) -> Option<String> {
        self.categories.get(hash)
    }

    /// Delete a transfer remotely and, when asked, its local directory.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownHash`] for unknown hashes,
    /// [`EngineError::UnsafePath`] when the transfer name does not resolve
    /// to a safe path under the target directory, and Provider errors when
    /// remote deletion fails.
    pub async fn remove(&self, hash: &str, delete_local_data: bool) -> EngineResult<()> {
        let cached = self.cache.by_hash(hash).ok_or_else(|| {
            EngineError::UnknownHash {
                hash: hash.to_string(),
            }
        })?;
        let transfer = cached.transfer;

        if let Some(file_id) = transfer.file_id.filter(|id| *id != 0) {
            match self.provider.delete_file(file_id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(source) => return Err(EngineError::provider("delete_file", source)),
            }
        }
        match self.provider.delete_transfer(transfer.id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(source) => return Err(EngineError::provider("delete_transfer", source)),
        }

        self.coordinator.remove_context(transfer.id);
        self.cache.remove(transfer.id);
        self.categories.remove(hash);

        if delete_local_data {
            let local = sanitized_local_path(&self.target_dir, &transfer.name)?;
            match tokio::fs::remove_dir_all(&local).await {
                Ok(()) => debug!(path = %local.display(), "removed local data"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(EngineError::io("remove.local_data", local, source)),
            }
        }

        let _ = self.events.publish(Event::TransferRemoved {
            transfer_id: transfer.id,
        });
        Ok(())
    }

    /// Account details from the Provider.
    ///
    /// # Errors
    ///
    /// Returns an error when the Provider call fails.
    pub async fn account(&self) -> EngineResult<AccountInfo> {
        self.provider
            .account_info()
            .await
            .map_err(|source| EngineError::provider("account_info", source))
    }

    /// Shut the engine down.
    pub async fn stop(&self) {
        self.engine.stop().await;
    }
}

/// Resolve a remote-supplied name into a path strictly under `target_dir`.
///
/// Parent-directory components are rejected outright; absolute prefixes are
/// normalised into the target directory so they cannot escape it.
fn sanitized_local_path(target_dir: &Path, name: &str) -> EngineResult<PathBuf> {
    let mut sanitized = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(EngineError::UnsafePath {
                    value: name.to_string(),
                });
            }
        }
    }
    if sanitized.as_os_str().is_empty() {
        return Err(EngineError::UnsafePath {
            value: name.to_string(),
        });
    }
    Ok(target_dir.join(sanitized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_names_stay_under_the_target() {
        let resolved =
            sanitized_local_path(Path::new("/downloads"), "My.Show.S01").expect("safe path");
        assert_eq!(resolved, PathBuf::from("/downloads/My.Show.S01"));
    }

    #[test]
    fn leading_slash_is_normalised_into_the_target() {
        let resolved =
            sanitized_local_path(Path::new("/downloads"), "/etc/passwd").expect("normalised");
        assert_eq!(resolved, PathBuf::from("/downloads/etc/passwd"));
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let err = sanitized_local_path(Path::new("/downloads"), "../../etc/passwd")
            .expect_err("traversal");
        assert!(matches!(err, EngineError::UnsafePath { .. }));

        let nested = sanitized_local_path(Path::new("/downloads"), "show/../../../etc")
            .expect_err("nested traversal");
        assert!(matches!(nested, EngineError::UnsafePath { .. }));
    }

    #[test]
    fn empty_names_are_rejected() {
        assert!(sanitized_local_path(Path::new("/downloads"), "").is_err());
        assert!(sanitized_local_path(Path::new("/downloads"), "/").is_err());
    }
}
