//! Trainer availability port.
//!
//! Two implementations: a plain in-memory block list, and one that reads the
//! trainer's time-off and schedule streams from the event store.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, TimeRange, TrainerId};
use domain::{Aggregate, DomainError, Schedule, TimeOff};
use event_store::{EventQuery, EventStore};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AvailabilityError {
    #[error("Trainer {trainer_id} is off between {start} and {end}")]
    Conflict {
        trainer_id: TrainerId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Trainer {trainer_id} already teaches schedule {schedule_id} between {start} and {end}")]
    ScheduleClash {
        trainer_id: TrainerId,
        schedule_id: AggregateId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Invalid window: {0}")]
    InvalidWindow(#[from] common::TimeRangeError),

    #[error("Could not read time off: {0}")]
    Lookup(#[from] DomainError),
}

#[async_trait]
pub trait TimeOffValidator: Send + Sync {
    /// Fails if the trainer is off, or already holds a live slot, at any
    /// point in `[start, end)`.
    async fn validate_no_overlap(
        &self,
        trainer_id: TrainerId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), AvailabilityError>;
}

/// In-memory list of blocked windows per trainer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTimeOffValidator {
    blocks: Arc<RwLock<HashMap<TrainerId, Vec<TimeRange>>>>,
}

impl InMemoryTimeOffValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, trainer_id: TrainerId, window: TimeRange) {
        self.blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(trainer_id)
            .or_default()
            .push(window);
    }
}

#[async_trait]
impl TimeOffValidator for InMemoryTimeOffValidator {
    async fn validate_no_overlap(
        &self,
        trainer_id: TrainerId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), AvailabilityError> {
        let requested = TimeRange::new(start, end)?;
        let blocks = self.blocks.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(hit) = blocks
            .get(&trainer_id)
            .and_then(|windows| windows.iter().find(|w| w.overlaps(&requested)))
        {
            return Err(AvailabilityError::Conflict {
                trainer_id,
                start: hit.start(),
                end: hit.end(),
            });
        }
        Ok(())
    }
}

/// Checks overlap against the active time-off blocks and the trainer's
/// live schedules in the event store.
#[derive(Clone)]
pub struct StoredTimeOffValidator<S: EventStore> {
    store: S,
}

impl<S: EventStore> StoredTimeOffValidator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Folds every stream of one aggregate type.
    async fn fold_all<A: Aggregate>(&self) -> Result<Vec<(AggregateId, A)>, DomainError> {
        let facts = self
            .store
            .query_events(EventQuery::new().aggregate_type(A::aggregate_type()))
            .await?;

        let mut by_id: HashMap<AggregateId, A> = HashMap::new();
        for envelope in facts {
            let event: A::Event = envelope.decode()?;
            let state = by_id.entry(envelope.aggregate_id).or_default();
            state.apply(event);
            state.set_version(envelope.version);
        }
        Ok(by_id.into_iter().collect())
    }
}

#[async_trait]
impl<S: EventStore> TimeOffValidator for StoredTimeOffValidator<S> {
    async fn validate_no_overlap(
        &self,
        trainer_id: TrainerId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), AvailabilityError> {
        let requested = TimeRange::new(start, end)?;

        for (_, time_off) in self.fold_all::<TimeOff>().await? {
            if time_off.trainer_id() == Some(trainer_id)
                && time_off.blocks(&requested)
                && let Some(window) = time_off.window()
            {
                return Err(AvailabilityError::Conflict {
                    trainer_id,
                    start: window.start(),
                    end: window.end(),
                });
            }
        }

        for (schedule_id, schedule) in self.fold_all::<Schedule>().await? {
            if schedule.trainer_id() == Some(trainer_id)
                && !schedule.status().is_terminal()
                && let Some(window) = schedule.window()
                && window.overlaps(&requested)
            {
                return Err(AvailabilityError::ScheduleClash {
                    trainer_id,
                    schedule_id,
                    start: window.start(),
                    end: window.end(),
                });
            }
        }
        Ok(())
    }
}
