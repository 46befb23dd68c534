// Event vocabulary shared by the store port, the reservation manager, and the checker.
//
// Purpose
// - Describe events, optimistic-write tokens, and subscription feeds as plain data.
//
// Boundaries
// - No input or output here. Adapters translate these types to their backend.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifiers threading a business transaction (correlation) and its
/// immediate trigger (causation) through every appended event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(rename = "$correlationId")]
    pub correlation_id: Uuid,
    #[serde(rename = "$causationId")]
    pub causation_id: Uuid,
}

/// An event as a producer hands it to the store, before a revision exists.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub id: Uuid,
    pub event_type: String,
    pub data: serde_json::Value,
    pub metadata: Option<EventMetadata>,
}

impl NewEvent {
    pub fn json<T: Serialize>(
        event_type: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            data: serde_json::to_value(data)?,
            metadata: None,
        })
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// An event as the store returns it: immutable, with its stream name and the
/// store-assigned revision (strictly increasing integer per stream, 0-based).
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub id: Uuid,
    pub stream_id: String,
    pub revision: u64,
    pub event_type: String,
    pub data: serde_json::Value,
    pub metadata: Option<EventMetadata>,
}

/// Optimistic-write token: the writer's view of the stream tail at append time.
///
/// Serializable because invariant-check requests carry the token for their
/// resulting event on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpectedPosition {
    /// The stream must not exist yet.
    NoStream,
    /// Any tail is acceptable; never conflicts.
    Any,
    /// The stream's last revision must be exactly this value.
    Exact(u64),
}

/// Which feed of events a subscription follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSelector {
    /// A single named stream.
    Stream(String),
    /// Every event of one type, across all streams.
    EventType(String),
    /// Every stream whose name starts with `{category}-`.
    Category(String),
    /// The global sequence.
    All,
}

impl StreamSelector {
    pub fn matches(&self, stream_id: &str, event_type: &str) -> bool {
        match self {
            StreamSelector::Stream(name) => name == stream_id,
            StreamSelector::EventType(kind) => kind == event_type,
            StreamSelector::Category(category) => stream_category(stream_id) == category,
            StreamSelector::All => true,
        }
    }
}

/// The category of a stream is its name up to the first `-`.
pub fn stream_category(stream_id: &str) -> &str {
    match stream_id.find('-') {
        Some(index) => &stream_id[..index],
        None => stream_id,
    }
}
