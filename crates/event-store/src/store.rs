use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Version};

/// Options for appending facts to one stream.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Version the writer observed before deciding. If None, no version
    /// check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the aggregate to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the aggregate to not exist (new aggregate).
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Facts for one aggregate stream inside an atomic multi-stream append.
#[derive(Debug, Clone)]
pub struct StreamAppend {
    pub events: Vec<EventEnvelope>,
    pub options: AppendOptions,
}

impl StreamAppend {
    /// Creates a stream append with the given version expectation.
    pub fn new(events: Vec<EventEnvelope>, options: AppendOptions) -> Self {
        Self { events, options }
    }

    /// Returns the aggregate this append targets.
    pub fn aggregate_id(&self) -> Option<AggregateId> {
        self.events.first().map(|e| e.aggregate_id)
    }
}

/// A stream of facts.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Core trait for event store implementations.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends facts to one or more aggregate streams atomically.
    ///
    /// Either every stream append succeeds or none does. Each stream whose
    /// current version differs from its `expected_version` fails the whole
    /// batch with `ConcurrencyConflict`.
    ///
    /// Returns the committed envelopes with their store-wide sequence set,
    /// in commit order.
    async fn append_streams(&self, streams: Vec<StreamAppend>) -> Result<Vec<EventEnvelope>>;

    /// Retrieves all facts for a specific aggregate, oldest first.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Retrieves facts matching a query, in sequence order.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Streams all facts in the store in sequence order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Gets the current version of an aggregate.
    ///
    /// Returns None if the aggregate doesn't exist.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Loads the last sequence a named consumer has fully processed.
    async fn load_checkpoint(&self, consumer: &str) -> Result<Option<i64>>;

    /// Records the last sequence a named consumer has fully processed.
    async fn save_checkpoint(&self, consumer: &str, sequence: i64) -> Result<()>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends facts to a single stream.
    ///
    /// Returns the new version of the aggregate.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        let committed = self
            .append_streams(vec![StreamAppend::new(events, options)])
            .await?;
        Ok(committed
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial()))
    }

    /// Checks if an aggregate exists (has any facts).
    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates a single stream's facts before appending.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "Cannot append empty event list".to_string(),
        ));
    };

    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "All events must be for the same aggregate".to_string(),
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::InvalidAppend(
                "All events must have the same aggregate type".to_string(),
            ));
        }
    }

    // Versions must be sequential
    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "Event versions must be sequential. Expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}

/// Validates a multi-stream batch: every stream is well formed and no
/// aggregate appears twice.
pub fn validate_streams_for_append(streams: &[StreamAppend]) -> Result<()> {
    if streams.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "Cannot append an empty batch".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(streams.len());
    for stream in streams {
        validate_events_for_append(&stream.events)?;
        let aggregate_id = stream.events[0].aggregate_id;
        if !seen.insert(aggregate_id) {
            return Err(EventStoreError::InvalidAppend(format!(
                "Aggregate {aggregate_id} appears more than once in the batch"
            )));
        }
    }

    Ok(())
}
