//! Atomic multi-aggregate commits.
//!
//! A reservation touches a booking and exactly one capacity owner (a schedule
//! or a recurrence group). Both streams must move together or not at all, so
//! commands record their facts on a [`UnitOfWork`] and commit once.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, StreamAppend, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

#[derive(Debug)]
struct PendingStream {
    aggregate_id: AggregateId,
    expected: Version,
    events: Vec<EventEnvelope>,
}

/// Facts decided by one command, buffered per aggregate until commit.
#[derive(Debug)]
pub struct UnitOfWork {
    streams: Vec<PendingStream>,
    recorded_at: DateTime<Utc>,
}

impl UnitOfWork {
    /// Starts an empty unit. Every fact recorded on it is stamped with `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            streams: Vec::new(),
            recorded_at: now,
        }
    }

    /// Records facts for one aggregate and applies them to the in-memory
    /// state so later decisions in the same command see them.
    ///
    /// Recording the same aggregate twice extends its stream; the version
    /// expectation stays the one observed at the first record.
    pub fn record<A: Aggregate>(
        &mut self,
        aggregate_id: AggregateId,
        aggregate: &mut A,
        events: Vec<A::Event>,
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }

        let index = match self
            .streams
            .iter()
            .position(|s| s.aggregate_id == aggregate_id)
        {
            Some(index) => index,
            None => {
                self.streams.push(PendingStream {
                    aggregate_id,
                    expected: aggregate.version(),
                    events: Vec::new(),
                });
                self.streams.len() - 1
            }
        };

        let recorded_at = self.recorded_at;
        let mut version = aggregate.version();
        for event in events {
            version = version.next();
            let envelope = EventEnvelope::from_fact(
                aggregate_id,
                A::aggregate_type(),
                version,
                event.event_type(),
                &event,
            )?
            .recorded_at(recorded_at);
            self.streams[index].events.push(envelope);
            aggregate.apply(event);
        }
        aggregate.set_version(version);

        Ok(())
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Returns the number of aggregate streams touched.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Writes every buffered stream in one atomic append.
    ///
    /// A stale version on any stream fails the whole unit with a retryable
    /// conflict and nothing is written.
    pub async fn commit<S: EventStore + ?Sized>(self, store: &S) -> Result<Committed, DomainError> {
        if self.streams.is_empty() {
            return Ok(Committed::default());
        }

        let stream_count = self.streams.len();
        let appends = self
            .streams
            .into_iter()
            .map(|s| StreamAppend::new(s.events, AppendOptions::expect_version(s.expected)))
            .collect();

        let events = store.append_streams(appends).await?;
        tracing::debug!(streams = stream_count, facts = events.len(), "unit of work committed");

        Ok(Committed(events))
    }
}

/// Facts that are durably stored.
///
/// Only a successful [`UnitOfWork::commit`] or a read back from the store
/// produces facts, which is what lets dispatchers promise after-commit
/// delivery.
#[derive(Debug, Clone, Default)]
pub struct Committed(Vec<EventEnvelope>);

impl Committed {
    /// Wraps facts read back from the store.
    ///
    /// Envelopes the store never sequenced are dropped.
    pub fn from_stored(mut events: Vec<EventEnvelope>) -> Self {
        events.retain(|e| e.sequence > 0);
        Self(events)
    }

    /// Returns the committed facts in commit order.
    pub fn events(&self) -> &[EventEnvelope] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Appends the facts of a later commit.
    pub fn extend(&mut self, other: Committed) {
        self.0.extend(other.0);
    }

    /// Returns the highest store sequence in this batch.
    pub fn last_sequence(&self) -> Option<i64> {
        self.0.iter().map(|e| e.sequence).max()
    }

    pub fn into_events(self) -> Vec<EventEnvelope> {
        self.0
    }
}

impl<'a> IntoIterator for &'a Committed {
    type Item = &'a EventEnvelope;
    type IntoIter = std::slice::Iter<'a, EventEnvelope>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
