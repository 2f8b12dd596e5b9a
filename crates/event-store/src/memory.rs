use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Version,
    store::{EventStore, EventStream, StreamAppend, validate_streams_for_append},
};

#[derive(Default)]
struct MemoryState {
    events: Vec<EventEnvelope>,
    checkpoints: HashMap<String, i64>,
}

impl MemoryState {
    fn current_version(&self, aggregate_id: AggregateId) -> Version {
        self.events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial())
    }
}

/// In-memory event store implementation for tests and the default wiring.
///
/// A single write lock covers the version checks and the insert of a whole
/// batch, which gives the same all-or-nothing behaviour as the PostgreSQL
/// transaction.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of facts stored.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_streams(&self, streams: Vec<StreamAppend>) -> Result<Vec<EventEnvelope>> {
        validate_streams_for_append(&streams)?;

        let mut state = self.state.write().await;

        // Check every stream before touching anything
        for stream in &streams {
            let first = &stream.events[0];
            let aggregate_id = first.aggregate_id;
            let current = state.current_version(aggregate_id);

            if let Some(expected) = stream.options.expected_version
                && current != expected
            {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected,
                    actual: current,
                });
            }

            // Unique (aggregate_id, version) simulation
            if first.version <= current {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: stream.options.expected_version.unwrap_or(current),
                    actual: current,
                });
            }
        }

        let mut committed = Vec::new();
        for stream in streams {
            for mut event in stream.events {
                event.sequence = state.events.len() as i64 + 1;
                state.events.push(event.clone());
                committed.push(event);
            }
        }

        Ok(committed)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let state = self.state.read().await;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let state = self.state.read().await;
        // Stored in sequence order already
        let matching = state.events.iter().filter(|e| query.matches(e)).cloned();
        let events = match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        };

        Ok(events)
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.state.read().await.events.clone();
        let stream = stream::iter(events.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let state = self.state.read().await;
        let version = state
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max();
        Ok(version)
    }

    async fn load_checkpoint(&self, consumer: &str) -> Result<Option<i64>> {
        Ok(self.state.read().await.checkpoints.get(consumer).copied())
    }

    async fn save_checkpoint(&self, consumer: &str, sequence: i64) -> Result<()> {
        self.state
            .write()
            .await
            .checkpoints
            .insert(consumer.to_string(), sequence);
        Ok(())
    }
}
