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
#![allow(clippy::multiple_crate_versions)]

//! Binary entrypoint that wires the wharf services together and blocks
//! until a shutdown signal arrives.

mod bootstrap;
mod error;
mod telemetry;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::run_app().await?;
    Ok(())
}
