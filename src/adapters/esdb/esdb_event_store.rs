// EventStoreDB implementation of the EventStore port.
//
// Purpose
// - Back the checker with a durable networked log in deployments; the gRPC
//   client owns the wire protocol, this adapter only translates types.
//
// Responsibilities
// - Map expected positions to the client's expected revisions and its
//   version conflicts back to `ConcurrencyConflict`.
// - Keep one checkpoint stream per subscriber (`__checkpoint-{name}`),
//   reading only its latest event back.
//
// Boundaries
// - A missing stream reads as empty; every transport fault surfaces as
//   `Unavailable`, never as an empty result.

use async_trait::async_trait;
use eventstore::{
    AppendToStreamOptions, Client, ClientSettings, CurrentRevision, EventData, ExpectedRevision,
    Position, ReadStreamOptions, StreamPosition, SubscribeToAllOptions, SubscribeToStreamOptions,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::event::{EventMetadata, ExpectedPosition, NewEvent, RecordedEvent, StreamSelector};
use crate::core::ports::{EventStore, EventStoreError, Subscription};

const CHECKPOINT_EVENT_TYPE: &str = "__checkpoint";

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    checkpoint: String,
}

pub struct EsdbEventStore {
    client: Client,
}

impl EsdbEventStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn connect(conn_string: &str) -> Result<Self, EventStoreError> {
        let settings: ClientSettings = conn_string
            .parse()
            .map_err(|error| EventStoreError::Backend(format!("invalid connection string: {error}")))?;
        let client = Client::new(settings)
            .map_err(|error| EventStoreError::Unavailable(error.to_string()))?;
        Ok(Self { client })
    }

    async fn spawn_stream_pump(
        &self,
        stream_name: String,
        resolve_links: bool,
        after: Option<u64>,
        sender: mpsc::UnboundedSender<RecordedEvent>,
    ) {
        let mut options = SubscribeToStreamOptions::default().start_from(match after {
            None => StreamPosition::Start,
            Some(revision) => StreamPosition::Position(revision),
        });
        if resolve_links {
            options = options.resolve_link_tos();
        }
        let mut subscription = self.client.subscribe_to_stream(stream_name, &options).await;
        tokio::spawn(async move {
            loop {
                match subscription.next().await {
                    Ok(resolved) => match decode(&resolved) {
                        Ok(event) => {
                            if sender.send(event).is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(%error, "skipping undecodable event");
                        }
                    },
                    Err(error) => {
                        tracing::error!(%error, "subscription terminated");
                        break;
                    }
                }
            }
        });
    }

    async fn spawn_all_pump(&self, after: Option<u64>, sender: mpsc::UnboundedSender<RecordedEvent>) {
        let options = SubscribeToAllOptions::default().position(match after {
            None => StreamPosition::Start,
            Some(commit) => StreamPosition::Position(Position {
                commit,
                prepare: commit,
            }),
        });
        let mut subscription = self.client.subscribe_to_all(&options).await;
        tokio::spawn(async move {
            loop {
                match subscription.next().await {
                    Ok(resolved) => match decode(&resolved) {
                        Ok(event) => {
                            if sender.send(event).is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(%error, "skipping undecodable event");
                        }
                    },
                    Err(error) => {
                        tracing::error!(%error, "subscription terminated");
                        break;
                    }
                }
            }
        });
    }
}

fn expected_revision(expected: ExpectedPosition) -> ExpectedRevision {
    match expected {
        ExpectedPosition::NoStream => ExpectedRevision::NoStream,
        ExpectedPosition::Any => ExpectedRevision::Any,
        ExpectedPosition::Exact(revision) => ExpectedRevision::Exact(revision),
    }
}

fn encode(event: NewEvent) -> Result<EventData, EventStoreError> {
    let data = EventData::json(&event.event_type, &event.data)
        .map_err(|error| EventStoreError::Backend(error.to_string()))?
        .id(event.id);
    match &event.metadata {
        Some(metadata) => data
            .metadata_as_json(metadata)
            .map_err(|error| EventStoreError::Backend(error.to_string())),
        None => Ok(data),
    }
}

fn decode(resolved: &eventstore::ResolvedEvent) -> Result<RecordedEvent, EventStoreError> {
    let event = resolved.get_original_event();
    let data = event
        .as_json::<serde_json::Value>()
        .map_err(|error| EventStoreError::Backend(error.to_string()))?;
    let metadata = serde_json::from_slice::<EventMetadata>(&event.custom_metadata).ok();
    Ok(RecordedEvent {
        id: event.id,
        stream_id: event.stream_id.clone(),
        revision: event.revision,
        event_type: event.event_type.clone(),
        data,
        metadata,
    })
}

fn map_append_error(
    stream: &str,
    expected: ExpectedPosition,
    error: eventstore::Error,
) -> EventStoreError {
    match error {
        eventstore::Error::WrongExpectedVersion { current, .. } => {
            EventStoreError::ConcurrencyConflict {
                stream: stream.to_string(),
                expected,
                actual: match current {
                    CurrentRevision::Current(revision) => Some(revision),
                    CurrentRevision::NoStream => None,
                },
            }
        }
        other => EventStoreError::Unavailable(other.to_string()),
    }
}

fn checkpoint_stream(name: &str) -> String {
    format!("__checkpoint-{name}")
}

#[async_trait]
impl EventStore for EsdbEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedPosition,
        events: Vec<NewEvent>,
    ) -> Result<u64, EventStoreError> {
        let options = AppendToStreamOptions::default().expected_revision(expected_revision(expected));
        let mut batch = Vec::with_capacity(events.len());
        for event in events {
            batch.push(encode(event)?);
        }
        let result = self
            .client
            .append_to_stream(stream_id, &options, batch)
            .await
            .map_err(|error| map_append_error(stream_id, expected, error))?;
        Ok(result.next_expected_version)
    }

    async fn read(&self, stream_id: &str) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let options = ReadStreamOptions::default()
            .position(StreamPosition::Start)
            .forwards();
        let mut stream = match self.client.read_stream(stream_id, &options).await {
            Ok(stream) => stream,
            Err(eventstore::Error::ResourceNotFound) => return Ok(Vec::new()),
            Err(error) => return Err(EventStoreError::Unavailable(error.to_string())),
        };

        let mut events = Vec::new();
        loop {
            match stream.next().await {
                Ok(Some(resolved)) => events.push(decode(&resolved)?),
                Ok(None) => break,
                Err(eventstore::Error::ResourceNotFound) => break,
                Err(error) => return Err(EventStoreError::Unavailable(error.to_string())),
            }
        }
        Ok(events)
    }

    async fn subscribe(
        &self,
        selector: StreamSelector,
        after: Option<u64>,
    ) -> Result<Subscription, EventStoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        match selector {
            StreamSelector::Stream(name) => {
                self.spawn_stream_pump(name, false, after, sender).await;
            }
            StreamSelector::EventType(event_type) => {
                self.spawn_stream_pump(format!("$et-{event_type}"), true, after, sender)
                    .await;
            }
            StreamSelector::Category(category) => {
                self.spawn_stream_pump(format!("$ce-{category}"), true, after, sender)
                    .await;
            }
            StreamSelector::All => {
                self.spawn_all_pump(after, sender).await;
            }
        }
        Ok(Subscription::from_receiver(receiver))
    }

    async fn get_checkpoint(&self, name: &str) -> Result<Option<u64>, EventStoreError> {
        let options = ReadStreamOptions::default()
            .position(StreamPosition::End)
            .backwards()
            .max_count(1);
        let mut stream = match self.client.read_stream(checkpoint_stream(name), &options).await {
            Ok(stream) => stream,
            Err(eventstore::Error::ResourceNotFound) => return Ok(None),
            Err(error) => return Err(EventStoreError::Unavailable(error.to_string())),
        };

        match stream.next().await {
            Ok(Some(resolved)) => {
                let record = resolved
                    .get_original_event()
                    .as_json::<CheckpointRecord>()
                    .map_err(|error| EventStoreError::Backend(error.to_string()))?;
                let position = record
                    .checkpoint
                    .parse::<u64>()
                    .map_err(|error| EventStoreError::Backend(format!("malformed checkpoint: {error}")))?;
                Ok(Some(position))
            }
            Ok(None) | Err(eventstore::Error::ResourceNotFound) => Ok(None),
            Err(error) => Err(EventStoreError::Unavailable(error.to_string())),
        }
    }

    async fn store_checkpoint(&self, name: &str, position: u64) -> Result<(), EventStoreError> {
        let record = CheckpointRecord {
            checkpoint: position.to_string(),
        };
        let event = NewEvent::json(CHECKPOINT_EVENT_TYPE, &record)
            .map_err(|error| EventStoreError::Backend(error.to_string()))?;
        let options = AppendToStreamOptions::default().expected_revision(ExpectedRevision::Any);
        self.client
            .append_to_stream(checkpoint_stream(name), &options, encode(event)?)
            .await
            .map_err(|error| EventStoreError::Unavailable(error.to_string()))?;
        Ok(())
    }
}
