use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventStore, Version};

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::unit_of_work::{Committed, UnitOfWork};

/// Outcome of a single-aggregate command: the folded state, the facts it
/// produced and their stored envelopes for dispatch.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub new_version: Version,
    pub committed: Committed,
}

/// Loads aggregates from their streams and runs single-aggregate commands.
///
/// Commands that span several aggregates build a [`UnitOfWork`] themselves
/// and use the handler only for loading.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Folds the stream into state. An empty stream yields the default
    /// instance at version 0.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let stream = self.store.get_events_for_aggregate(aggregate_id).await?;

        stream.into_iter().try_fold(A::default(), |mut state, envelope| {
            state.apply(envelope.decode::<A::Event>()?);
            state.set_version(envelope.version);
            Ok(state)
        })
    }

    /// Like [`load`](Self::load), but `None` until the creation fact exists.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    pub async fn load_required(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        self.load_existing(aggregate_id)
            .await?
            .ok_or(DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
            })
    }

    /// Decides against the current state and commits the resulting facts.
    /// A decision that yields no facts writes nothing.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        now: DateTime<Utc>,
        decide: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;

        let events = decide(&aggregate)?;
        if events.is_empty() {
            let new_version = aggregate.version();
            return Ok(CommandResult {
                aggregate,
                events,
                new_version,
                committed: Committed::default(),
            });
        }

        let mut unit = UnitOfWork::new(now);
        unit.record(aggregate_id, &mut aggregate, events.clone())?;
        let committed = unit.commit(&self.store).await?;

        Ok(CommandResult {
            new_version: aggregate.version(),
            aggregate,
            events,
            committed,
        })
    }
}
