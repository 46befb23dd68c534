// Reservation state is never stored; it is derived by folding a reservation
// stream's history left to right.
//
// Purpose
// - Define deterministic transitions for the two reservation events.
//
// Boundaries
// - No input or output. No side effects. Independent of the store.
//
// Testing guidance
// - Folding a sequence of events must yield the same holder no matter how
//   the sequence is chunked into reads.

use serde::{Deserialize, Serialize};

use crate::core::event::RecordedEvent;

pub const RESERVED_EVENT_TYPE: &str = "Reserved";
pub const UNRESERVED_EVENT_TYPE: &str = "Unreserved";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPayload {
    pub reserved_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationEvent {
    Reserved(ReservationPayload),
    Unreserved(ReservationPayload),
}

impl ReservationEvent {
    /// Interpret a stored event as a reservation transition. Events of any
    /// other type fold as no-ops and read as `None` here.
    pub fn from_recorded(event: &RecordedEvent) -> Option<Self> {
        let payload: ReservationPayload = serde_json::from_value(event.data.clone()).ok()?;
        match event.event_type.as_str() {
            RESERVED_EVENT_TYPE => Some(ReservationEvent::Reserved(payload)),
            UNRESERVED_EVENT_TYPE => Some(ReservationEvent::Unreserved(payload)),
            _ => None,
        }
    }
}

/// One transition of the holder fold.
///
/// A `Reserved` event grants only when the key is unheld; an `Unreserved`
/// event releases only when issued by the current holder. Everything else
/// leaves the holder unchanged, so at most one holder exists at any prefix.
pub fn apply(holder: Option<String>, event: &ReservationEvent) -> Option<String> {
    match (holder, event) {
        (None, ReservationEvent::Reserved(payload)) => Some(payload.reserved_by.clone()),
        (Some(current), ReservationEvent::Unreserved(payload)) if current == payload.reserved_by => {
            None
        }
        (holder, _) => holder,
    }
}

/// Current holder after replaying `events` in order.
pub fn fold_holder<'a>(events: impl IntoIterator<Item = &'a ReservationEvent>) -> Option<String> {
    events.into_iter().fold(None, apply)
}
