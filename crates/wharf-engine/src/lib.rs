#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Transfer lifecycle engine for the wharf daemon.
//!
//! The engine tracks remote Provider transfers through a per-transfer state
//! machine, mirrors their payloads onto local disk through a bounded worker
//! pool of resumable HTTP downloads, and reconciles the remote and local
//! views on a timer. Progress is modelled in two phases: the remote download
//! on the Provider side and the local fetch, each mapped onto half of the
//! client-facing completion fraction.

mod cache;
mod categories;
mod context;
mod coordinator;
mod download;
mod error;
mod facade;
mod lifecycle;
mod pool;
mod progress;
mod reconciler;
mod settings;

pub use cache::{CachedTransfer, TransferCache};
pub use categories::{CategoryStore, STATE_FILE_NAME};
pub use context::{ContextSnapshot, LocalRate, TransferContext, TransferPhase};
pub use coordinator::TransferCoordinator;
pub use error::{CancelReason, EngineError, EngineResult, chain_text};
pub use facade::{BridgeFacade, SubmitSource};
pub use lifecycle::Engine;
pub use pool::{DownloadJob, DownloadPool, EnqueueOutcome};
pub use progress::{
    ProgressCalculator, ProgressSnapshot, STATUS_DOWNLOAD, STATUS_QUEUED, STATUS_SEED,
    STATUS_STOPPED,
};
pub use settings::EngineSettings;

/// Suffix appended to in-flight download targets.
pub const PARTIAL_SUFFIX: &str = "partial";
