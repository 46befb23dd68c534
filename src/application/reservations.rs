// Reservation manager: turns a race for a unique value into a serialized
// decision using only single-stream optimistic appends.
//
// Responsibilities
// - Replay a reservation key's history and fold it into the current holder.
// - Claim the key by appending at exactly the revision observed, so any
//   writer with a stale view of history is rejected by the store.
//
// Boundaries
// - No locking here. Races between claimants are resolved entirely by the
//   store's per-stream append serialization.

use std::sync::Arc;

use crate::core::event::{EventMetadata, ExpectedPosition, NewEvent};
use crate::core::ports::{EventStore, EventStoreError};
use crate::core::reservation::{
    fold_holder, RESERVED_EVENT_TYPE, ReservationEvent, ReservationPayload,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Granted,
    /// The key is held by someone else. `current_holder` is `None` when the
    /// claim lost the append race and the winner is not known locally.
    Denied { current_holder: Option<String> },
}

pub struct Reservations<S: EventStore + ?Sized> {
    store: Arc<S>,
}

impl<S: EventStore + ?Sized> Reservations<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Attempt to claim `key` for `claimant`.
    ///
    /// Exactly one of N concurrent claimants can succeed: the append in step
    /// three carries the revision observed in step one, and the store rejects
    /// every writer whose view has gone stale. A conflict is a denial, never
    /// retried here. A claimant that already holds the key is granted again
    /// without a new write, which is what makes redelivery after a crash
    /// idempotent.
    pub async fn reserve(
        &self,
        key: &str,
        claimant: &str,
        metadata: EventMetadata,
    ) -> Result<ReserveOutcome, EventStoreError> {
        let history = self.store.read(key).await?;
        let last_revision = history.last().map(|event| event.revision);
        let transitions: Vec<ReservationEvent> = history
            .iter()
            .filter_map(ReservationEvent::from_recorded)
            .collect();

        match fold_holder(&transitions) {
            Some(current_holder) if current_holder != claimant => Ok(ReserveOutcome::Denied {
                current_holder: Some(current_holder),
            }),
            Some(_) => Ok(ReserveOutcome::Granted),
            None => {
                let expected = match last_revision {
                    None => ExpectedPosition::NoStream,
                    Some(revision) => ExpectedPosition::Exact(revision),
                };
                let payload = ReservationPayload {
                    reserved_by: claimant.to_string(),
                };
                let event = NewEvent::json(RESERVED_EVENT_TYPE, &payload)
                    .map_err(|error| EventStoreError::Backend(error.to_string()))?
                    .with_metadata(metadata);

                match self.store.append(key, expected, vec![event]).await {
                    Ok(_) => Ok(ReserveOutcome::Granted),
                    Err(EventStoreError::ConcurrencyConflict { .. }) => {
                        tracing::debug!(key, claimant, "lost the reservation race");
                        Ok(ReserveOutcome::Denied {
                            current_holder: None,
                        })
                    }
                    Err(error) => Err(error),
                }
            }
        }
    }
}
