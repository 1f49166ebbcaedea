//! Persistent mapping from torrent hash to category label.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error, warn};

use crate::error::{EngineError, EngineResult};

/// Name of the state file kept in the target directory.
pub const STATE_FILE_NAME: &str = ".wharf-state.json";

/// Hash-to-category store backed by a JSON file in the target directory.
///
/// Persistence is best-effort: the map is serialised inside the lock into a
/// byte buffer and written outside it; write failures are logged, never
/// surfaced.
pub struct CategoryStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl CategoryStore {
    /// Construct a store persisting under the given target directory.
    #[must_use]
    pub fn new(target_dir: &Path) -> Self {
        Self {
            path: target_dir.join(STATE_FILE_NAME),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Load the state file, treating a missing file as an empty mapping.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(&self) -> EngineResult<()> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no category state file yet");
                return Ok(());
            }
            Err(source) => return Err(EngineError::io("categories.read", &self.path, source)),
        };
        let parsed: HashMap<String, String> =
            serde_json::from_str(&raw).map_err(|source| EngineError::Io {
                operation: "categories.parse",
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, source),
            })?;
        *self.write_entries() = parsed;
        Ok(())
    }

    /// Record a category for a hash. Empty hashes or categories are ignored.
    pub fn set(&self, hash: &str, category: &str) {
        if hash.is_empty() || category.is_empty() {
            return;
        }
        {
            let mut entries = self.write_entries();
            entries.insert(hash.to_string(), category.to_string());
        }
        self.persist();
    }

    /// Look up the category recorded for a hash.
    #[must_use]
    pub fn get(&self, hash: &str) -> Option<String> {
        self.read_entries().get(hash).cloned()
    }

    /// Forget the category recorded for a hash.
    pub fn remove(&self, hash: &str) {
        let removed = self.write_entries().remove(hash).is_some();
        if removed {
            self.persist();
        }
    }

    /// Snapshot of every recorded mapping.
    #[must_use]
    pub fn all(&self) -> HashMap<String, String> {
        self.read_entries().clone()
    }

    fn persist(&self) {
        let serialised = {
            let entries = self.read_entries();
            serde_json::to_vec_pretty(&*entries)
        };
        let payload = match serialised {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialise category state");
                return;
            }
        };
        if let Err(err) = std::fs::write(&self.path, payload) {
            warn!(
                error = %err,
                path = %self.path.display(),
                "failed to persist category state"
            );
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("category store lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("category store lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}
