// Invariant-check request vocabulary: what a producer appends when it wants
// an event committed only if a uniqueness constraint holds.
//
// Purpose
// - Carry the invariant descriptor and the template of the resulting event
//   through the request stream.
//
// Versioning and evolution
// - `unique` is the only kind today. Unknown kinds still deserialize so the
//   checker can skip and report them instead of halting.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::event::{EventMetadata, ExpectedPosition, NewEvent};

/// Stream producers append requests to.
pub const REQUEST_STREAM: &str = "__async_invariant";
/// Event type of a request on that stream.
pub const REQUEST_EVENT_TYPE: &str = "__InvariantCheckRequested";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InvariantKind {
    Unique,
    /// A kind this checker does not understand; kept verbatim for reporting.
    Other(String),
}

impl From<String> for InvariantKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "unique" => InvariantKind::Unique,
            _ => InvariantKind::Other(value),
        }
    }
}

impl From<InvariantKind> for String {
    fn from(kind: InvariantKind) -> Self {
        match kind {
            InvariantKind::Unique => "unique".to_string(),
            InvariantKind::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invariant {
    pub category: String,
    pub value: String,
    /// The aggregate claiming the value; becomes the reservation holder.
    pub entity_id: String,
    #[serde(rename = "type")]
    pub kind: InvariantKind,
}

impl Invariant {
    /// Name of the stream that arbitrates ownership of this value.
    pub fn reservation_key(&self) -> String {
        format!("{}-{}", self.category, self.value)
    }
}

/// Template of the event the checker appends when the invariant holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultingEventTemplate {
    pub stream_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Explicit event id; when absent the checker derives a deterministic id
    /// from the request so retries append the identical event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub expected_position: ExpectedPosition,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvariantCheckRequested {
    pub invariant: Invariant,
    pub resulting_event: ResultingEventTemplate,
}

impl InvariantCheckRequested {
    /// A well-formed uniqueness request.
    pub fn unique(
        category: impl Into<String>,
        value: impl Into<String>,
        entity_id: impl Into<String>,
        resulting_event: ResultingEventTemplate,
    ) -> Self {
        Self {
            invariant: Invariant {
                category: category.into(),
                value: value.into(),
                entity_id: entity_id.into(),
                kind: InvariantKind::Unique,
            },
            resulting_event,
        }
    }

    /// The event a producer appends to [`REQUEST_STREAM`].
    pub fn into_request_event(self) -> Result<NewEvent, serde_json::Error> {
        NewEvent::json(REQUEST_EVENT_TYPE, &self)
    }
}
