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

//! Provider-agnostic client surface for the remote cloud-torrent service.
//!
//! The engine consumes a single capability trait ([`ProviderClient`]); the
//! REST adapter in [`rest`] is the production implementation and the engine
//! test suite supplies an in-memory double. DTOs mirror the Provider's wire
//! vocabulary without committing the core to any one vendor.

mod client;
mod error;
mod model;
pub mod rest;

pub use client::ProviderClient;
pub use error::{ProviderError, ProviderResult};
pub use model::{
    AccountInfo, DiskUsage, FileKind, RemoteFile, Transfer, TransferEntry, TransferStatus,
};
