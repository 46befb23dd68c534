// End to end in memory tests for the invariant check flow.
//
// A producer appends uniqueness-check requests, the checker runs as a
// background task, and outcomes are observed the only way producers can
// observe them: through the presence or absence of the resulting event.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use tokio_util::sync::CancellationToken;

use invariant_checker::adapters::in_memory::in_memory_event_store::InMemoryEventStore;
use invariant_checker::application::checker::{InvariantChecker, SUBSCRIBER_NAME};
use invariant_checker::application::errors::CheckerError;
use invariant_checker::application::reservations::Reservations;
use invariant_checker::core::event::{ExpectedPosition, NewEvent};
use invariant_checker::core::invariant::{
    InvariantCheckRequested, REQUEST_EVENT_TYPE, REQUEST_STREAM, ResultingEventTemplate,
};
use invariant_checker::core::ports::EventStore;

fn spawn_checker(
    store: Arc<InMemoryEventStore>,
    cancellation: CancellationToken,
) -> tokio::task::JoinHandle<Result<(), CheckerError>> {
    tokio::spawn(async move {
        let reservations = Reservations::new(store.clone());
        InvariantChecker::new(store, reservations)
            .run(cancellation)
            .await
    })
}

async fn register_user(store: &InMemoryEventStore, user_id: &str, email: &str, name: &str) {
    let request = InvariantCheckRequested::unique(
        "UserEmailReservation",
        email,
        user_id,
        ResultingEventTemplate {
            stream_id: format!("User-{user_id}"),
            event_type: "UserRegistered".to_string(),
            id: None,
            expected_position: ExpectedPosition::NoStream,
            data: serde_json::json!({ "userId": user_id, "email": email, "name": name }),
            metadata: None,
        },
    );
    let event = request.into_request_event().expect("request serializes");
    store
        .append(REQUEST_STREAM, ExpectedPosition::Any, vec![event])
        .await
        .expect("request append");
}

async fn wait_for_checkpoint(store: &InMemoryEventStore, position: u64) {
    for _ in 0..400 {
        let checkpoint = store
            .get_checkpoint(SUBSCRIBER_NAME)
            .await
            .expect("checkpoint read");
        if checkpoint.is_some_and(|p| p >= position) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("checker never reached checkpoint {position}");
}

#[rstest]
#[tokio::test]
async fn it_should_commit_the_registration_when_the_email_is_unclaimed() {
    let store = Arc::new(InMemoryEventStore::new());
    let cancellation = CancellationToken::new();
    spawn_checker(store.clone(), cancellation.clone());

    register_user(&store, "a", "joe@aol.com", "Joe").await;
    wait_for_checkpoint(&store, 0).await;

    let committed = store.read("User-a").await.unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].event_type, "UserRegistered");
    assert_eq!(committed[0].data["email"], "joe@aol.com");
    cancellation.cancel();
}

#[rstest]
#[tokio::test]
async fn it_should_block_a_second_registration_with_the_same_email() {
    let store = Arc::new(InMemoryEventStore::new());
    let cancellation = CancellationToken::new();
    spawn_checker(store.clone(), cancellation.clone());

    register_user(&store, "a", "joe@aol.com", "Joe").await;
    register_user(&store, "b", "joe@aol.com", "Joe").await;
    wait_for_checkpoint(&store, 1).await;

    assert_eq!(store.read("User-a").await.unwrap().len(), 1);
    assert!(store.read("User-b").await.unwrap().is_empty());
    cancellation.cancel();
}

#[rstest]
#[tokio::test]
async fn it_should_let_exactly_one_of_a_hundred_concurrent_claims_through() {
    let store = Arc::new(InMemoryEventStore::new());
    let cancellation = CancellationToken::new();
    spawn_checker(store.clone(), cancellation.clone());

    let mut producers = tokio::task::JoinSet::new();
    for i in 0..100 {
        let store = store.clone();
        producers.spawn(async move {
            register_user(&store, &format!("user-{i}"), "joe@aol.com", &format!("Joe {i}")).await;
        });
    }
    while producers.join_next().await.is_some() {}
    wait_for_checkpoint(&store, 99).await;

    let mut committed = 0;
    for i in 0..100 {
        committed += store
            .read(&format!("User-user-{i}"))
            .await
            .unwrap()
            .len();
    }
    assert_eq!(committed, 1);
    cancellation.cancel();
}

#[rstest]
#[tokio::test]
async fn it_should_skip_an_unsupported_kind_and_keep_processing() {
    let store = Arc::new(InMemoryEventStore::new());
    let cancellation = CancellationToken::new();
    spawn_checker(store.clone(), cancellation.clone());

    let malformed = NewEvent::json(
        REQUEST_EVENT_TYPE,
        &serde_json::json!({
            "invariant": {
                "category": "UserEmailReservation",
                "value": "joe@aol.com",
                "entityId": "a",
                "type": "mutually-exclusive"
            },
            "resultingEvent": {
                "streamId": "User-a",
                "type": "UserRegistered",
                "expectedPosition": "noStream",
                "data": {}
            }
        }),
    )
    .unwrap();
    store
        .append(REQUEST_STREAM, ExpectedPosition::Any, vec![malformed])
        .await
        .unwrap();
    register_user(&store, "b", "joe@aol.com", "Joe").await;
    wait_for_checkpoint(&store, 1).await;

    // The malformed request committed nothing, and did not stop the next one.
    assert!(store.read("User-a").await.unwrap().is_empty());
    assert_eq!(store.read("User-b").await.unwrap().len(), 1);
    cancellation.cancel();
}

#[rstest]
#[tokio::test]
async fn it_should_ignore_foreign_event_types_on_the_request_stream() {
    let store = Arc::new(InMemoryEventStore::new());
    let cancellation = CancellationToken::new();
    spawn_checker(store.clone(), cancellation.clone());

    let noise = NewEvent::json("SomethingElse", &serde_json::json!({ "n": 1 })).unwrap();
    store
        .append(REQUEST_STREAM, ExpectedPosition::Any, vec![noise])
        .await
        .unwrap();
    register_user(&store, "a", "joe@aol.com", "Joe").await;
    wait_for_checkpoint(&store, 1).await;

    assert_eq!(store.read("User-a").await.unwrap().len(), 1);
    cancellation.cancel();
}
