// Invariant checker: drives the checkpointed subscription loop over the
// request stream and resolves each request to exactly one outcome.
//
// Responsibilities
// - Resume the subscription strictly after the stored checkpoint.
// - Delegate each uniqueness claim to the reservation manager.
// - On a granted claim, append the request's templated event with causal
//   metadata; on a denied claim, append nothing.
// - Advance the checkpoint after every request, whatever the outcome, and
//   never start the next request before the current checkpoint write lands.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::errors::CheckerError;
use crate::application::reservations::{Reservations, ReserveOutcome};
use crate::core::event::{EventMetadata, NewEvent, RecordedEvent, StreamSelector};
use crate::core::invariant::{
    InvariantCheckRequested, InvariantKind, REQUEST_EVENT_TYPE, REQUEST_STREAM,
};
use crate::core::ports::{EventStore, EventStoreError};

/// Checkpoint owner name; one logical subscriber is assumed.
pub const SUBSCRIBER_NAME: &str = "InvariantChecker";

/// How one request resolved. Observable otherwise only through the presence
/// or absence of the resulting event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Reservation granted and the resulting event appended.
    Committed { stream_id: String, revision: u64 },
    /// Reservation lost, or the resulting-event append collided; nothing
    /// was committed for this request.
    Denied {
        key: String,
        current_holder: Option<String>,
    },
    /// The request could not be interpreted; reported and stepped over so
    /// one malformed request cannot stop all future processing.
    Skipped { reason: String },
}

pub struct InvariantChecker<S: EventStore + ?Sized> {
    store: Arc<S>,
    reservations: Reservations<S>,
}

impl<S: EventStore + ?Sized> InvariantChecker<S> {
    pub fn new(store: Arc<S>, reservations: Reservations<S>) -> Self {
        Self {
            store,
            reservations,
        }
    }

    /// Run the subscription loop until `cancellation` fires or the store
    /// fails. Requests are processed strictly sequentially, in delivery
    /// order; a request already in flight runs to completion.
    pub async fn run(&self, cancellation: CancellationToken) -> Result<(), CheckerError> {
        let checkpoint = self.store.get_checkpoint(SUBSCRIBER_NAME).await?;
        let mut subscription = self
            .store
            .subscribe(StreamSelector::Stream(REQUEST_STREAM.to_string()), checkpoint)
            .await?;
        tracing::info!(?checkpoint, stream = REQUEST_STREAM, "subscribed to request stream");

        loop {
            let delivered = tokio::select! {
                _ = cancellation.cancelled() => break,
                delivered = subscription.next() => delivered,
            };
            let Some(request) = delivered else {
                tracing::warn!("request subscription closed");
                break;
            };
            if request.event_type != REQUEST_EVENT_TYPE {
                continue;
            }

            let outcome = self.process(&request).await?;
            match &outcome {
                CheckOutcome::Committed { stream_id, .. } => {
                    tracing::info!(request = %request.id, stream = %stream_id, "invariant check succeeded");
                }
                CheckOutcome::Denied { key, current_holder } => {
                    tracing::info!(request = %request.id, key = %key, holder = ?current_holder, "invariant check failed");
                }
                CheckOutcome::Skipped { reason } => {
                    tracing::error!(request = %request.id, %reason, "invariant check skipped");
                }
            }

            self.store
                .store_checkpoint(SUBSCRIBER_NAME, request.revision)
                .await?;
        }
        Ok(())
    }

    /// Resolve a single request. Store faults propagate; business outcomes
    /// do not.
    pub async fn process(&self, request: &RecordedEvent) -> Result<CheckOutcome, CheckerError> {
        let check: InvariantCheckRequested = match serde_json::from_value(request.data.clone()) {
            Ok(check) => check,
            Err(error) => {
                return Ok(CheckOutcome::Skipped {
                    reason: format!("undecodable request payload: {error}"),
                });
            }
        };
        if let InvariantKind::Other(kind) = &check.invariant.kind {
            return Ok(CheckOutcome::Skipped {
                reason: format!("unsupported invariant kind \"{kind}\""),
            });
        }

        let metadata = EventMetadata {
            correlation_id: request
                .metadata
                .map(|m| m.correlation_id)
                .unwrap_or(request.id),
            causation_id: request.id,
        };
        let key = check.invariant.reservation_key();

        match self
            .reservations
            .reserve(&key, &check.invariant.entity_id, metadata)
            .await?
        {
            ReserveOutcome::Denied { current_holder } => Ok(CheckOutcome::Denied {
                key,
                current_holder,
            }),
            ReserveOutcome::Granted => {
                let template = check.resulting_event;
                let resulting = NewEvent {
                    id: template.id.unwrap_or_else(|| resulting_event_id(request.id)),
                    event_type: template.event_type,
                    data: template.data,
                    metadata: Some(template.metadata.unwrap_or(metadata)),
                };
                match self
                    .store
                    .append(&template.stream_id, template.expected_position, vec![resulting])
                    .await
                {
                    Ok(revision) => Ok(CheckOutcome::Committed {
                        stream_id: template.stream_id,
                        revision,
                    }),
                    Err(EventStoreError::ConcurrencyConflict { .. }) => Ok(CheckOutcome::Denied {
                        key,
                        current_holder: None,
                    }),
                    Err(error) => Err(error.into()),
                }
            }
        }
    }
}

/// Deterministic idempotency id for a request's resulting event, so the
/// crash-then-redeliver retry appends a byte-identical event.
fn resulting_event_id(request_id: Uuid) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, request_id.as_bytes())
}

#[cfg(test)]
mod invariant_checker_tests {
    use super::*;
    use crate::adapters::in_memory::in_memory_event_store::InMemoryEventStore;
    use crate::core::event::ExpectedPosition;
    use crate::core::invariant::ResultingEventTemplate;
    use rstest::{fixture, rstest};

    fn checker(store: &Arc<InMemoryEventStore>) -> InvariantChecker<InMemoryEventStore> {
        InvariantChecker::new(store.clone(), Reservations::new(store.clone()))
    }

    fn request_event(user_id: &str, email: &str) -> RecordedEvent {
        let check = InvariantCheckRequested::unique(
            "UserEmailReservation",
            email,
            user_id,
            ResultingEventTemplate {
                stream_id: format!("User-{user_id}"),
                event_type: "UserRegistered".to_string(),
                id: None,
                expected_position: ExpectedPosition::NoStream,
                data: serde_json::json!({ "userId": user_id, "email": email }),
                metadata: None,
            },
        );
        RecordedEvent {
            id: Uuid::now_v7(),
            stream_id: REQUEST_STREAM.to_string(),
            revision: 0,
            event_type: REQUEST_EVENT_TYPE.to_string(),
            data: serde_json::to_value(&check).unwrap(),
            metadata: None,
        }
    }

    #[fixture]
    fn store() -> Arc<InMemoryEventStore> {
        Arc::new(InMemoryEventStore::new())
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_commit_the_resulting_event_with_causal_metadata(
        store: Arc<InMemoryEventStore>,
    ) {
        let checker = checker(&store);
        let request = request_event("user-1", "joe@aol.com");

        let outcome = checker.process(&request).await.unwrap();

        assert!(matches!(outcome, CheckOutcome::Committed { .. }));
        let committed = store.read("User-user-1").await.unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].event_type, "UserRegistered");
        let metadata = committed[0].metadata.expect("causal metadata");
        assert_eq!(metadata.causation_id, request.id);
        assert_eq!(metadata.correlation_id, request.id);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_inherit_the_correlation_id_when_the_request_has_one(
        store: Arc<InMemoryEventStore>,
    ) {
        let checker = checker(&store);
        let correlation_id = Uuid::now_v7();
        let mut request = request_event("user-1", "joe@aol.com");
        request.metadata = Some(EventMetadata {
            correlation_id,
            causation_id: Uuid::now_v7(),
        });

        checker.process(&request).await.unwrap();

        let committed = store.read("User-user-1").await.unwrap();
        let metadata = committed[0].metadata.expect("causal metadata");
        assert_eq!(metadata.correlation_id, correlation_id);
        assert_eq!(metadata.causation_id, request.id);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_deny_and_name_the_holder_when_the_value_is_taken(
        store: Arc<InMemoryEventStore>,
    ) {
        let checker = checker(&store);
        checker
            .process(&request_event("user-1", "joe@aol.com"))
            .await
            .unwrap();

        let outcome = checker
            .process(&request_event("user-2", "joe@aol.com"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CheckOutcome::Denied {
                key: "UserEmailReservation-joe@aol.com".to_string(),
                current_holder: Some("user-1".to_string()),
            }
        );
        assert!(store.read("User-user-2").await.unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_map_a_resulting_append_conflict_to_a_denial(
        store: Arc<InMemoryEventStore>,
    ) {
        let checker = checker(&store);
        let occupant = NewEvent::json("UserImported", &serde_json::json!({})).unwrap();
        store
            .append("User-user-1", ExpectedPosition::NoStream, vec![occupant])
            .await
            .unwrap();

        let outcome = checker
            .process(&request_event("user-1", "joe@aol.com"))
            .await
            .unwrap();

        assert!(matches!(outcome, CheckOutcome::Denied { .. }));
        assert_eq!(store.read("User-user-1").await.unwrap().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_not_duplicate_the_resulting_event_on_redelivery(
        store: Arc<InMemoryEventStore>,
    ) {
        let checker = checker(&store);
        let request = request_event("user-1", "joe@aol.com");

        let first = checker.process(&request).await.unwrap();
        let second = checker.process(&request).await.unwrap();

        assert!(matches!(first, CheckOutcome::Committed { .. }));
        assert!(matches!(second, CheckOutcome::Denied { .. }));
        let committed = store.read("User-user-1").await.unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].id, resulting_event_id(request.id));
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_skip_unsupported_invariant_kinds(store: Arc<InMemoryEventStore>) {
        let checker = checker(&store);
        let mut request = request_event("user-1", "joe@aol.com");
        request.data["invariant"]["type"] = serde_json::json!("mutually-exclusive");

        let outcome = checker.process(&request).await.unwrap();

        assert_eq!(
            outcome,
            CheckOutcome::Skipped {
                reason: "unsupported invariant kind \"mutually-exclusive\"".to_string()
            }
        );
        assert!(store.read("User-user-1").await.unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_skip_undecodable_request_payloads(store: Arc<InMemoryEventStore>) {
        let checker = checker(&store);
        let mut request = request_event("user-1", "joe@aol.com");
        request.data = serde_json::json!({ "not": "a request" });

        let outcome = checker.process(&request).await.unwrap();

        assert!(matches!(outcome, CheckOutcome::Skipped { .. }));
    }
}
