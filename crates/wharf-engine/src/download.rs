//! Resumable, stall-watched HTTP fetcher used by the worker pool.
//!
//! Each job downloads into `<target>.partial` and renames on success. A
//! partial file left behind by an earlier attempt (or an earlier daemon
//! run) resumes through a `Range` request. A per-attempt watchdog aborts
//! the attempt when no bytes arrive for longer than the stall timeout, and
//! a progress ticker folds received bytes into the transfer context so the
//! client-facing progress keeps moving between chunk boundaries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONNECTION, RANGE, USER_AGENT};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::{LocalRate, TransferContext};
use crate::error::{CancelReason, EngineError, EngineResult};
use crate::settings::EngineSettings;

/// Product identifier presented to download servers.
const PRODUCT_USER_AGENT: &str = concat!("wharf/", env!("CARGO_PKG_VERSION"));
/// Retry budget for a single job.
const MAX_ATTEMPTS: u32 = 3;
/// Linear backoff step between attempts.
const BACKOFF_STEP: Duration = Duration::from_secs(1);
/// Upper bound for the stall watchdog tick.
const WATCHDOG_TICK: Duration = Duration::from_secs(5);

/// Callback folding a transfer's accumulated byte count outward (into the
/// transfer cache). Arguments: transfer id, accumulated downloaded size.
pub(crate) type ProgressSink = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// One file to fetch on behalf of a tracked transfer.
pub(crate) struct DownloadRequest {
    pub(crate) transfer_id: u64,
    pub(crate) file_id: u64,
    pub(crate) url: String,
    pub(crate) target: PathBuf,
    pub(crate) ctx: Arc<TransferContext>,
    pub(crate) cancel: CancellationToken,
}

/// Terminal outcome of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    /// The file is fully on disk under its final name.
    Completed {
        /// Total size of the file in bytes.
        bytes: u64,
    },
    /// The attempt was cancelled; the partial file stays for a later resume.
    Cancelled(CancelReason),
}

/// HTTP fetcher shared by every worker.
pub(crate) struct Downloader {
    client: reqwest::Client,
    header_timeout: Duration,
    stall_timeout: Duration,
    progress_interval: Duration,
    sink: ProgressSink,
}

impl Downloader {
    /// Build the fetcher and its HTTP client from engine settings.
    ///
    /// The client carries no overall timeout; slow but moving downloads are
    /// only bounded by the stall watchdog.
    pub(crate) fn new(settings: &EngineSettings, sink: ProgressSink) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(settings.idle_connection_timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|source| EngineError::network("client.build", source))?;
        Ok(Self {
            client,
            header_timeout: settings.download_header_timeout,
            stall_timeout: settings.download_stall_timeout,
            progress_interval: settings.progress_update_interval,
            sink,
        })
    }

    /// Run a download job to its terminal outcome, retrying transient
    /// failures with linear backoff. Stall aborts surface as a cancelled
    /// outcome; the next reconcile pass re-queues the file.
    pub(crate) async fn run(&self, request: &DownloadRequest) -> EngineResult<FetchOutcome> {
        let mut attempt = 1;
        loop {
            match self.attempt(request).await {
                Ok(bytes) => return Ok(FetchOutcome::Completed { bytes }),
                Err(EngineError::DownloadCancelled { reason, .. }) => {
                    return Ok(FetchOutcome::Cancelled(reason));
                }
                Err(err @ EngineError::DownloadStalled { .. }) => {
                    warn!(
                        transfer_id = request.transfer_id,
                        file_id = request.file_id,
                        error = %err,
                        "download aborted by stall watchdog"
                    );
                    return Ok(FetchOutcome::Cancelled(CancelReason::Stalled));
                }
                Err(err) if attempt < MAX_ATTEMPTS && err.is_retryable() => {
                    let delay = BACKOFF_STEP * attempt;
                    warn!(
                        transfer_id = request.transfer_id,
                        file_id = request.file_id,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "transient download failure; backing off"
                    );
                    tokio::select! {
                        () = request.cancel.cancelled() => {
                            return Ok(FetchOutcome::Cancelled(CancelReason::Shutdown));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, request: &DownloadRequest) -> EngineResult<u64> {
        if let Some(parent) = request.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| EngineError::io("download.create_dir", parent, source))?;
        }

        let partial = partial_path(&request.target);
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&partial)
            .await
            .map_err(|source| EngineError::io("download.open_partial", &partial, source))?;
        let start_offset = file
            .metadata()
            .await
            .map_err(|source| EngineError::io("download.stat_partial", &partial, source))?
            .len();

        let received = Arc::new(AtomicU64::new(0));
        let reported = Arc::new(AtomicU64::new(0));
        let expected = Arc::new(AtomicU64::new(0));
        let stalled = Arc::new(AtomicBool::new(false));
        let attempt_token = request.cancel.child_token();

        let monitor = self.spawn_monitor(MonitorState {
            transfer_id: request.transfer_id,
            ctx: Arc::clone(&request.ctx),
            token: attempt_token.clone(),
            received: Arc::clone(&received),
            reported: Arc::clone(&reported),
            expected: Arc::clone(&expected),
            stalled: Arc::clone(&stalled),
        });

        let result = self
            .transfer(
                request,
                &attempt_token,
                file,
                &partial,
                start_offset,
                &received,
                &expected,
                &stalled,
            )
            .await;

        attempt_token.cancel();
        let _ = monitor.await;
        fold_progress(
            &received,
            &reported,
            &request.ctx,
            &self.sink,
            request.transfer_id,
        );
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn transfer(
        &self,
        request: &DownloadRequest,
        attempt_token: &CancellationToken,
        file: File,
        partial: &Path,
        start_offset: u64,
        received: &Arc<AtomicU64>,
        expected: &Arc<AtomicU64>,
        stalled: &Arc<AtomicBool>,
    ) -> EngineResult<u64> {
        let mut builder = self
            .client
            .get(&request.url)
            .header(USER_AGENT, PRODUCT_USER_AGENT)
            .header(ACCEPT, "*/*")
            .header(CONNECTION, "keep-alive");
        if start_offset > 0 {
            builder = builder.header(RANGE, format!("bytes={start_offset}-"));
        }

        let waited = Instant::now();
        let response = tokio::select! {
            () = attempt_token.cancelled() => {
                return Err(self.cancelled_error(request.file_id, stalled));
            }
            sent = tokio::time::timeout(self.header_timeout, builder.send()) => match sent {
                Err(_) => {
                    return Err(EngineError::HeaderTimeout {
                        file_id: request.file_id,
                        waited_secs: waited.elapsed().as_secs(),
                    });
                }
                Ok(Err(source)) => return Err(EngineError::network("download.send", source)),
                Ok(Ok(response)) => response,
            }
        };

        let mut offset = start_offset;
        let total = match response.status() {
            StatusCode::OK => {
                if offset > 0 {
                    // The server ignored the range; restart from zero.
                    debug!(
                        file_id = request.file_id,
                        offset, "range not honoured; truncating partial file"
                    );
                    file.set_len(0)
                        .await
                        .map_err(|source| EngineError::io("download.truncate", partial, source))?;
                    offset = 0;
                }
                content_length(request.file_id, &response)?
            }
            StatusCode::PARTIAL_CONTENT => content_length(request.file_id, &response)? + offset,
            status => {
                return Err(EngineError::HttpStatus {
                    file_id: request.file_id,
                    status: status.as_u16(),
                });
            }
        };
        expected.store(total - offset, Ordering::Release);

        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        loop {
            tokio::select! {
                () = attempt_token.cancelled() => {
                    let _ = writer.flush().await;
                    return Err(self.cancelled_error(request.file_id, stalled));
                }
                chunk = stream.next() => match chunk {
                    None => break,
                    Some(Err(source)) => {
                        let _ = writer.flush().await;
                        return Err(EngineError::network("download.body", source));
                    }
                    Some(Ok(bytes)) => {
                        writer.write_all(&bytes).await.map_err(|source| {
                            EngineError::io("download.write", partial, source)
                        })?;
                        let _ = received.fetch_add(bytes.len() as u64, Ordering::AcqRel);
                    }
                },
            }
        }

        let fetched = received.load(Ordering::Acquire);
        if offset + fetched < total {
            return Err(EngineError::Truncated {
                file_id: request.file_id,
                expected: total,
                received: offset + fetched,
            });
        }

        writer
            .flush()
            .await
            .map_err(|source| EngineError::io("download.flush", partial, source))?;
        let file = writer.into_inner();
        file.sync_all()
            .await
            .map_err(|source| EngineError::io("download.sync", partial, source))?;
        drop(file);
        tokio::fs::rename(partial, &request.target)
            .await
            .map_err(|source| EngineError::io("download.rename", &request.target, source))?;

        Ok(total)
    }

    fn cancelled_error(&self, file_id: u64, stalled: &Arc<AtomicBool>) -> EngineError {
        if stalled.load(Ordering::Acquire) {
            EngineError::DownloadStalled {
                file_id,
                idle_secs: self.stall_timeout.as_secs(),
            }
        } else {
            EngineError::DownloadCancelled {
                file_id,
                reason: CancelReason::Shutdown,
            }
        }
    }

    fn spawn_monitor(&self, state: MonitorState) -> JoinHandle<()> {
        let stall_timeout = self.stall_timeout;
        let watch_tick = (stall_timeout / 2).clamp(Duration::from_millis(50), WATCHDOG_TICK);
        let progress_tick = self
            .progress_interval
            .max(Duration::from_millis(50));
        let sink = Arc::clone(&self.sink);

        tokio::spawn(async move {
            let mut watchdog = tokio::time::interval(watch_tick);
            watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut progress = tokio::time::interval(progress_tick);
            progress.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut last_seen = 0_u64;
            let mut last_change = Instant::now();
            let mut window_started = Instant::now();

            loop {
                tokio::select! {
                    () = state.token.cancelled() => break,
                    _ = watchdog.tick() => {
                        let current = state.received.load(Ordering::Acquire);
                        if current != last_seen {
                            last_seen = current;
                            last_change = Instant::now();
                            continue;
                        }
                        let expected = state.expected.load(Ordering::Acquire);
                        let done = expected > 0 && current >= expected;
                        if !done && last_change.elapsed() >= stall_timeout {
                            state.stalled.store(true, Ordering::Release);
                            state.token.cancel();
                            break;
                        }
                    }
                    _ = progress.tick() => {
                        let delta = fold_progress(
                            &state.received,
                            &state.reported,
                            &state.ctx,
                            &sink,
                            state.transfer_id,
                        );
                        let elapsed = window_started.elapsed();
                        window_started = Instant::now();
                        if delta > 0 && elapsed > Duration::ZERO {
                            let speed = rate_per_second(delta, elapsed);
                            let remaining = state
                                .expected
                                .load(Ordering::Acquire)
                                .saturating_sub(state.received.load(Ordering::Acquire));
                            state.ctx.record_rate(LocalRate {
                                bytes_per_sec: speed,
                                eta_secs: (speed > 0).then(|| remaining / speed),
                            });
                        }
                    }
                }
            }
        })
    }
}

struct MonitorState {
    transfer_id: u64,
    ctx: Arc<TransferContext>,
    token: CancellationToken,
    received: Arc<AtomicU64>,
    reported: Arc<AtomicU64>,
    expected: Arc<AtomicU64>,
    stalled: Arc<AtomicBool>,
}

/// Fold bytes received since the last fold into the context and the sink.
/// Returns the folded delta.
fn fold_progress(
    received: &Arc<AtomicU64>,
    reported: &Arc<AtomicU64>,
    ctx: &Arc<TransferContext>,
    sink: &ProgressSink,
    transfer_id: u64,
) -> u64 {
    let current = received.load(Ordering::Acquire);
    let prior = reported.swap(current, Ordering::AcqRel);
    let delta = current.saturating_sub(prior);
    if delta > 0 {
        ctx.add_downloaded(delta);
        sink(transfer_id, ctx.downloaded_size());
    }
    delta
}

fn rate_per_second(bytes: u64, window: Duration) -> u64 {
    #[expect(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "byte rates fit f64 precision for any realistic window"
    )]
    {
        (bytes as f64 / window.as_secs_f64()) as u64
    }
}

fn content_length(file_id: u64, response: &reqwest::Response) -> EngineResult<u64> {
    match response.content_length() {
        Some(length) if length > 0 => Ok(length),
        Some(length) => Err(EngineError::InvalidContentLength {
            file_id,
            length: i64::try_from(length).unwrap_or(i64::MAX),
        }),
        None => Err(EngineError::InvalidContentLength {
            file_id,
            length: -1,
        }),
    }
}

/// Temporary on-disk name for an in-flight download.
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".");
    name.push(crate::PARTIAL_SUFFIX);
    PathBuf::from(name)
}
