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

//! File-backed configuration for the wharf daemon.
//!
//! Settings live in a single YAML document loaded at startup; a handful of
//! sensitive or deployment-specific values can be overridden through
//! `WHARF_*` environment variables. The model deliberately carries only the
//! knobs the engine and the Provider adapter consult.

mod defaults;
mod error;
mod loader;
mod model;
mod validate;

pub use error::ConfigError;
pub use loader::{CONFIG_PATH_ENV, default_config_path, load, load_from_path};
pub use model::{EngineProfile, LogFormat, LoggingProfile, ProviderProfile, WharfConfig};
pub use validate::validate;
