// In memory implementation of the EventStore port.
//
// Purpose
// - Support checker and reservation tests and local development without a
//   running store.
//
// Responsibilities
// - Store events per stream in memory and enforce optimistic concurrency
//   with exactly the durable adapter's conflict rule.
// - Deliver appended events to every matching live subscription
//   synchronously at append time, so tests are deterministic.
//
// Testing guidance
// - Each test constructs its own isolated instance; there is no hidden
//   process-wide state. `set_offline` simulates an unreachable store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use crate::core::event::{ExpectedPosition, NewEvent, RecordedEvent, StreamSelector};
use crate::core::ports::{EventStore, EventStoreError, Subscription};

struct Subscriber {
    selector: StreamSelector,
    after: Option<u64>,
    /// Running sequence of matched events, the coordinate system for
    /// derived feeds (event-type, category, global).
    matched: u64,
    sender: mpsc::UnboundedSender<RecordedEvent>,
}

impl Subscriber {
    fn wants(&mut self, event: &RecordedEvent) -> bool {
        if !self.selector.matches(&event.stream_id, &event.event_type) {
            return false;
        }
        let coordinate = match self.selector {
            StreamSelector::Stream(_) => event.revision,
            _ => {
                let coordinate = self.matched;
                self.matched += 1;
                coordinate
            }
        };
        match self.after {
            None => true,
            Some(after) => coordinate > after,
        }
    }
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, Vec<RecordedEvent>>,
    /// Every event in global append order, for replay into new subscriptions.
    log: Vec<RecordedEvent>,
    checkpoints: HashMap<String, u64>,
    subscribers: Vec<Subscriber>,
}

#[derive(Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
    offline: AtomicBool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable`, as an unreachable
    /// store would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), EventStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedPosition,
        events: Vec<NewEvent>,
    ) -> Result<u64, EventStoreError> {
        self.ensure_online()?;
        if events.is_empty() {
            return Err(EventStoreError::Backend("append of zero events".to_string()));
        }

        let mut inner = self.inner.write().await;
        let stream_len = inner.streams.get(stream_id).map_or(0, |s| s.len() as u64);
        let actual = stream_len.checked_sub(1);
        let conflict = match expected {
            ExpectedPosition::Any => false,
            ExpectedPosition::NoStream => stream_len > 0,
            ExpectedPosition::Exact(revision) => actual != Some(revision),
        };
        if conflict {
            return Err(EventStoreError::ConcurrencyConflict {
                stream: stream_id.to_string(),
                expected,
                actual,
            });
        }

        let mut appended = Vec::with_capacity(events.len());
        let stream = inner.streams.entry(stream_id.to_string()).or_default();
        for event in events {
            let recorded = RecordedEvent {
                id: event.id,
                stream_id: stream_id.to_string(),
                revision: stream.len() as u64,
                event_type: event.event_type,
                data: event.data,
                metadata: event.metadata,
            };
            stream.push(recorded.clone());
            appended.push(recorded);
        }
        let last = stream_len + appended.len() as u64 - 1;

        inner.log.extend(appended.iter().cloned());
        inner.subscribers.retain_mut(|subscriber| {
            for event in &appended {
                if subscriber.wants(event) && subscriber.sender.send(event.clone()).is_err() {
                    return false;
                }
            }
            true
        });

        Ok(last)
    }

    async fn read(&self, stream_id: &str) -> Result<Vec<RecordedEvent>, EventStoreError> {
        self.ensure_online()?;
        let inner = self.inner.read().await;
        Ok(inner.streams.get(stream_id).cloned().unwrap_or_default())
    }

    async fn subscribe(
        &self,
        selector: StreamSelector,
        after: Option<u64>,
    ) -> Result<Subscription, EventStoreError> {
        self.ensure_online()?;
        let mut inner = self.inner.write().await;
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut subscriber = Subscriber {
            selector,
            after,
            matched: 0,
            sender,
        };
        for event in &inner.log {
            if subscriber.wants(event) {
                let _ = subscriber.sender.send(event.clone());
            }
        }
        inner.subscribers.push(subscriber);
        Ok(Subscription::from_receiver(receiver))
    }

    async fn get_checkpoint(&self, name: &str) -> Result<Option<u64>, EventStoreError> {
        self.ensure_online()?;
        let inner = self.inner.read().await;
        Ok(inner.checkpoints.get(name).copied())
    }

    async fn store_checkpoint(&self, name: &str, position: u64) -> Result<(), EventStoreError> {
        self.ensure_online()?;
        let mut inner = self.inner.write().await;
        inner.checkpoints.insert(name.to_string(), position);
        Ok(())
    }
}
