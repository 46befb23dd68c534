// Ports define what the core needs from the outside world, without implementing it.
//
// Purpose
// - Describe the append-only log store as a trait: optimistic appends,
//   full-stream reads, resumable live subscriptions, and per-subscriber
//   checkpoints.
//
// Responsibilities
// - Keep the reservation manager and the checker independent of any concrete
//   store by coding against this trait.
//
// Testing guidance
// - The in memory adapter implements the same contract for tests and local
//   development; conflict detection and delivery order must not differ
//   between adapters.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::event::{ExpectedPosition, NewEvent, RecordedEvent, StreamSelector};

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The writer's expected position did not match the stream's actual tail.
    /// Expected and recoverable; `actual` is `None` for a stream that does
    /// not exist yet.
    #[error("concurrency conflict on {stream}: expected {expected:?}, actual {actual:?}")]
    ConcurrencyConflict {
        stream: String,
        expected: ExpectedPosition,
        actual: Option<u64>,
    },

    /// The store could not be reached. Distinct from an empty read: callers
    /// must never mistake an outage for a virgin stream or a missing
    /// checkpoint.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Ordered feed of events handed out by [`EventStore::subscribe`]. Dropping
/// it cancels the subscription.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<RecordedEvent>,
}

impl Subscription {
    pub fn from_receiver(receiver: mpsc::UnboundedReceiver<RecordedEvent>) -> Self {
        Self { receiver }
    }

    /// Next delivered event, or `None` once the feed has terminated.
    pub async fn next(&mut self) -> Option<RecordedEvent> {
        self.receiver.recv().await
    }
}

/// Append-only per-stream log with optimistic concurrency.
///
/// Ordering and conflict detection are guaranteed only within a single
/// stream; there is no cross-stream transaction. `after` positions are
/// interpreted in the feed's own coordinates: the stream revision for a
/// single-stream feed, the feed's running sequence for derived feeds
/// (event-type, category, global). Delivered events always carry their
/// origin-stream revision.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `events` to `stream_id`, failing with
    /// [`EventStoreError::ConcurrencyConflict`] when `expected` does not
    /// match the stream's actual tail. Returns the stream's new last
    /// revision. `events` must not be empty.
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedPosition,
        events: Vec<NewEvent>,
    ) -> Result<u64, EventStoreError>;

    /// Full history of `stream_id` from the beginning. A stream that has
    /// never been written reads as an empty sequence, not an error.
    async fn read(&self, stream_id: &str) -> Result<Vec<RecordedEvent>, EventStoreError>;

    /// Live ordered feed of matching events, historical then newly appended,
    /// starting strictly after `after` (from the beginning when `None`).
    async fn subscribe(
        &self,
        selector: StreamSelector,
        after: Option<u64>,
    ) -> Result<Subscription, EventStoreError>;

    /// Last position `name` has fully processed, or `None` before the first
    /// [`EventStore::store_checkpoint`].
    async fn get_checkpoint(&self, name: &str) -> Result<Option<u64>, EventStoreError>;

    /// Persist the watermark for `name`. Idempotent; last write wins.
    async fn store_checkpoint(&self, name: &str, position: u64) -> Result<(), EventStoreError>;
}
