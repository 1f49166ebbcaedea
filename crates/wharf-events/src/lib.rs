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

//! Typed event bus for the wharf transfer lifecycle.
//!
//! The engine publishes one event per observable lifecycle transition and the
//! application subscribes for structured logging. Internally the bus uses
//! `tokio::broadcast` with a bounded buffer; slow subscribers skip over
//! dropped events rather than stalling publishers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};

/// Identifier assigned to each event emitted by the daemon.
pub type EventId = u64;

/// Default buffer size for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1_024;

/// Typed lifecycle events surfaced across the daemon.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A remote transfer became tracked by the coordinator.
    TransferTracked {
        /// Remote identifier of the tracked transfer.
        transfer_id: u64,
        /// Display name reported by the Provider.
        name: String,
        /// Number of files that still need downloading.
        total_files: u64,
    },
    /// Local downloading started for a tracked transfer.
    DownloadStarted {
        /// Remote identifier of the transfer.
        transfer_id: u64,
    },
    /// A single file finished downloading (or was already present on disk).
    FileCompleted {
        /// Remote identifier of the owning transfer.
        transfer_id: u64,
        /// Remote identifier of the file.
        file_id: u64,
    },
    /// A single file failed permanently after exhausting retries.
    FileFailed {
        /// Remote identifier of the owning transfer.
        transfer_id: u64,
        /// Remote identifier of the file.
        file_id: u64,
        /// Human-readable failure detail.
        message: String,
    },
    /// Every file of a transfer completed locally.
    TransferCompleted {
        /// Remote identifier of the transfer.
        transfer_id: u64,
    },
    /// Cleanup hooks ran and the transfer reached its terminal state.
    TransferProcessed {
        /// Remote identifier of the transfer.
        transfer_id: u64,
    },
    /// The transfer failed and was dropped from tracking.
    TransferFailed {
        /// Remote identifier of the transfer.
        transfer_id: u64,
        /// Human-readable failure detail.
        message: String,
    },
    /// The transfer was cancelled (shutdown or stall abort).
    TransferCancelled {
        /// Remote identifier of the transfer.
        transfer_id: u64,
        /// Human-readable cancellation detail.
        message: String,
    },
    /// An errored remote transfer was re-submitted to the Provider.
    TransferRetried {
        /// Remote identifier of the transfer.
        transfer_id: u64,
        /// Retry attempt number, starting at 1.
        attempt: u32,
    },
    /// The remote copy of a transfer was deleted.
    TransferRemoved {
        /// Remote identifier of the transfer.
        transfer_id: u64,
    },
    /// The transfer cache was rebuilt from a fresh Provider listing.
    CacheRefreshed {
        /// Number of transfers held after the rebuild.
        transfers: usize,
    },
}

impl Event {
    /// Machine-friendly discriminator for logging consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TransferTracked { .. } => "transfer_tracked",
            Self::DownloadStarted { .. } => "download_started",
            Self::FileCompleted { .. } => "file_completed",
            Self::FileFailed { .. } => "file_failed",
            Self::TransferCompleted { .. } => "transfer_completed",
            Self::TransferProcessed { .. } => "transfer_processed",
            Self::TransferFailed { .. } => "transfer_failed",
            Self::TransferCancelled { .. } => "transfer_cancelled",
            Self::TransferRetried { .. } => "transfer_retried",
            Self::TransferRemoved { .. } => "transfer_removed",
            Self::CacheRefreshed { .. } => "cache_refreshed",
        }
    }

    /// Remote transfer id the event concerns, when it concerns one.
    #[must_use]
    pub const fn transfer_id(&self) -> Option<u64> {
        match self {
            Self::TransferTracked { transfer_id, .. }
            | Self::DownloadStarted { transfer_id }
            | Self::FileCompleted { transfer_id, .. }
            | Self::FileFailed { transfer_id, .. }
            | Self::TransferCompleted { transfer_id }
            | Self::TransferProcessed { transfer_id }
            | Self::TransferFailed { transfer_id, .. }
            | Self::TransferCancelled { transfer_id, .. }
            | Self::TransferRetried { transfer_id, .. }
            | Self::TransferRemoved { transfer_id } => Some(*transfer_id),
            Self::CacheRefreshed { .. } => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Construct a bus with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    ///
    /// Events published while no subscriber is attached are dropped; the bus
    /// never blocks or fails a publisher.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events from the live broadcast channel,
/// skipping over anything dropped while the subscriber lagged.
pub struct EventStream {
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, or `None` once every publisher is gone.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged; skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    fn sample_event(id: u64) -> Event {
        Event::FileCompleted {
            transfer_id: id,
            file_id: id * 10,
        }
    }

    #[test]
    fn event_kinds_cover_all_variants() {
        let events = [
            Event::TransferTracked {
                transfer_id: 1,
                name: "demo".to_string(),
                total_files: 3,
            },
            Event::DownloadStarted { transfer_id: 1 },
            Event::FileCompleted {
                transfer_id: 1,
                file_id: 7,
            },
            Event::FileFailed {
                transfer_id: 1,
                file_id: 7,
                message: "boom".to_string(),
            },
            Event::TransferCompleted { transfer_id: 1 },
            Event::TransferProcessed { transfer_id: 1 },
            Event::TransferFailed {
                transfer_id: 1,
                message: "boom".to_string(),
            },
            Event::TransferCancelled {
                transfer_id: 1,
                message: "shutdown".to_string(),
            },
            Event::TransferRetried {
                transfer_id: 1,
                attempt: 2,
            },
            Event::TransferRemoved { transfer_id: 1 },
            Event::CacheRefreshed { transfers: 4 },
        ];

        let mut kinds: Vec<&str> = events.iter().map(Event::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), events.len(), "duplicate event kind");
    }

    #[test]
    fn transfer_id_present_for_transfer_events() {
        assert_eq!(
            Event::TransferProcessed { transfer_id: 9 }.transfer_id(),
            Some(9)
        );
        assert_eq!(Event::CacheRefreshed { transfers: 0 }.transfer_id(), None);
    }

    #[test]
    fn events_round_trip_through_serde() {
        let event = Event::FileFailed {
            transfer_id: 3,
            file_id: 14,
            message: "http 500".to_string(),
        };
        let raw = serde_json::to_string(&event).expect("serialize");
        let parsed: Event = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(parsed, event);
    }

    #[tokio::test]
    async fn publish_assigns_sequential_ids() {
        let bus = EventBus::with_capacity(16);
        let mut stream = bus.subscribe();

        let first = bus.publish(sample_event(1));
        let second = bus.publish(sample_event(2));
        assert_eq!(second, first + 1);

        let received = timeout(RECV_TIMEOUT, stream.next())
            .await
            .expect("stream stalled")
            .expect("stream closed");
        assert_eq!(received.id, first);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_fail() {
        let bus = EventBus::with_capacity(4);
        let id = bus.publish(sample_event(1));
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_ahead() {
        let bus = EventBus::with_capacity(2);
        let mut stream = bus.subscribe();

        for i in 0..8 {
            let _ = bus.publish(sample_event(i));
        }

        let event = timeout(RECV_TIMEOUT, stream.next())
            .await
            .expect("stream stalled")
            .expect("stream closed");
        assert!(event.id > 1, "expected the oldest events to be dropped");
    }

    #[tokio::test]
    async fn stream_returns_none_after_sender_dropped() {
        let mut stream = {
            let bus = EventBus::with_capacity(1);
            let stream = bus.subscribe();
            drop(bus);
            stream
        };
        assert!(
            stream.next().await.is_none(),
            "closing the sender should end the stream"
        );
    }
}
