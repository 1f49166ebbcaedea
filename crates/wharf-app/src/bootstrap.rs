//! Application bootstrap: configuration, Provider wiring, engine lifecycle,
//! and signal-driven shutdown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use wharf_config::{EngineProfile, ProviderProfile};
use wharf_engine::{Engine, EngineSettings};
use wharf_events::{Event, EventBus, EventStream};
use wharf_provider::{ProviderClient, rest::RestProvider};

use crate::error::{AppError, AppResult};
use crate::telemetry;

/// Entry point for the daemon boot sequence.
pub(crate) async fn run_app() -> AppResult<()> {
    let config = wharf_config::load().map_err(|source| AppError::config("config.load", source))?;
    telemetry::init(&config.logging)
        .map_err(|source| AppError::telemetry("telemetry.init", source))?;

    info!(version = env!("CARGO_PKG_VERSION"), "wharf starting");

    let provider = Arc::new(
        RestProvider::new(&config.provider.api_base, &config.provider.api_token)
            .map_err(|source| AppError::provider("provider.new", source))?,
    );
    let folder_id = resolve_folder(provider.as_ref(), &config.provider).await?;
    let settings = engine_settings(&config.engine, folder_id);

    let events = EventBus::new();
    let engine = Engine::new(
        settings,
        Arc::clone(&provider) as Arc<dyn ProviderClient>,
        events.clone(),
    )
    .map_err(|source| AppError::engine("engine.new", source))?;
    let log_task = spawn_event_log_task(events.subscribe());
    engine
        .start()
        .await
        .map_err(|source| AppError::engine("engine.start", source))?;

    let facade = engine.facade();
    match facade.account().await {
        Ok(account) => info!(
            username = %account.username,
            disk_avail = account.disk.avail,
            disk_total = account.disk.total,
            "provider account ready"
        ),
        Err(err) => warn!(error = %err, "provider account check failed; continuing"),
    }

    wait_for_shutdown().await;
    info!("shutdown signal received");

    facade.stop().await;
    log_task.abort();
    let _ = log_task.await;
    info!("wharf stopped");
    Ok(())
}

/// Resolve the Provider folder scoping tracked transfers, creating it by
/// name when no explicit id is configured.
async fn resolve_folder(
    provider: &dyn ProviderClient,
    profile: &ProviderProfile,
) -> AppResult<u64> {
    if profile.folder_id != 0 {
        return Ok(profile.folder_id);
    }
    let name = profile.folder_name.as_deref().unwrap_or_default();
    let folder_id = provider
        .ensure_folder(name)
        .await
        .map_err(|source| AppError::provider("provider.ensure_folder", source))?;
    info!(folder = name, folder_id, "resolved provider folder");
    Ok(folder_id)
}

/// Map the configuration document onto the engine's settings struct.
fn engine_settings(profile: &EngineProfile, folder_id: u64) -> EngineSettings {
    EngineSettings {
        target_dir: profile.target_dir.clone(),
        folder_id,
        worker_count: profile.worker_count,
        transfer_check_interval: profile.transfer_check_interval(),
        cache_update_interval: profile.cache_update_interval(),
        progress_update_interval: profile.progress_update_interval(),
        download_stall_timeout: profile.download_stall_timeout(),
        download_header_timeout: profile.download_header_timeout(),
        idle_connection_timeout: profile.idle_connection_timeout(),
        seeding_time_threshold: profile.seeding_time_threshold(),
        max_retry_attempts: profile.max_retry_attempts,
    }
}

/// Mirror engine events into the structured log.
fn spawn_event_log_task(mut stream: EventStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = stream.next().await {
            match &envelope.event {
                Event::TransferFailed {
                    transfer_id,
                    message,
                } => warn!(
                    transfer_id,
                    detail = %message,
                    event = envelope.event.kind(),
                    "transfer event"
                ),
                Event::FileFailed {
                    transfer_id,
                    file_id,
                    message,
                } => warn!(
                    transfer_id,
                    file_id,
                    detail = %message,
                    event = envelope.event.kind(),
                    "transfer event"
                ),
                event => info!(
                    transfer_id = event.transfer_id(),
                    event = event.kind(),
                    "transfer event"
                ),
            }
        }
    })
}

/// Block until SIGINT or, on Unix, SIGTERM arrives.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
