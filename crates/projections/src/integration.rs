//! Tier-2 integration events published to other contexts.
//!
//! Every stored fact maps to one integration event named after its source
//! aggregate. Facts after creation do not repeat the slot details, so the
//! translator looks them up on the aggregate's creation fact; downstream
//! projectors can then draw a calendar entry without calling back.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Actor, AggregateId, TicketId, TimeRange, TrainerId, UserId};
use domain::booking::{BookingEvent, BookingStatus, BookingType};
use domain::policy::CancellationClass;
use domain::recurrence::{RecurrenceEvent, RecurrenceStatus};
use domain::schedule::{ScheduleEvent, ScheduleStatus};
use domain::time_off::{TimeOffEvent, TimeOffStatus};
use domain::{Aggregate, Booking, RecurrenceGroup, Schedule, TimeOff};
use event_store::{EventEnvelope, EventQuery, EventStore, Version};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{ProjectionError, Result};

/// Where an integration event came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub source_id: AggregateId,

    /// Version of the source stream after the fact. Increases by one per
    /// fact, so receivers can order facts of one aggregate.
    pub source_version: Version,

    /// Store-wide commit sequence.
    pub sequence: i64,

    pub fact_type: String,
    pub occurred_at: DateTime<Utc>,
}

/// Key receivers use to drop redeliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub source_id: AggregateId,
    pub fact_type: String,
    pub source_version: Version,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingChanged {
    pub source: EventSource,
    pub actor: Actor,
    pub schedule_id: AggregateId,
    pub user_id: UserId,
    pub booking_type: BookingType,
    /// None on creation.
    pub previous: Option<BookingStatus>,
    pub new: BookingStatus,
    pub classification: Option<CancellationClass>,
    pub reason: Option<String>,
    pub ticket_id: Option<TicketId>,
    pub group_id: Option<AggregateId>,
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleChanged {
    pub source: EventSource,
    pub actor: Actor,
    pub previous: Option<ScheduleStatus>,
    pub new: ScheduleStatus,
    /// Free seats after the fact.
    pub capacity: u32,
    pub booking_id: Option<AggregateId>,
    pub group_id: Option<AggregateId>,
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceGroupChanged {
    pub source: EventSource,
    pub actor: Actor,
    pub previous: Option<RecurrenceStatus>,
    pub new: RecurrenceStatus,
    pub remaining_capacity: u32,
    pub user_id: Option<UserId>,
    pub booking_ids: Vec<AggregateId>,
    pub classification: Option<CancellationClass>,
    /// Enrollment tickets to give back to their members.
    pub refunded_tickets: Vec<TicketId>,
    pub children: Vec<AggregateId>,
    pub trainer_id: TrainerId,
    /// From the start of the first occurrence to the end of the last.
    pub window: TimeRange,
    pub title: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOffChanged {
    pub source: EventSource,
    pub actor: Actor,
    pub previous: Option<TimeOffStatus>,
    pub new: TimeOffStatus,
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub reason: Option<String>,
}

/// Events exposed to other bounded contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IntegrationEvent {
    BookingChanged(BookingChanged),
    ScheduleChanged(ScheduleChanged),
    RecurrenceGroupChanged(RecurrenceGroupChanged),
    TimeOffChanged(TimeOffChanged),
}

impl IntegrationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            IntegrationEvent::BookingChanged(_) => "BookingChanged",
            IntegrationEvent::ScheduleChanged(_) => "ScheduleChanged",
            IntegrationEvent::RecurrenceGroupChanged(_) => "RecurrenceGroupChanged",
            IntegrationEvent::TimeOffChanged(_) => "TimeOffChanged",
        }
    }

    pub fn source(&self) -> &EventSource {
        match self {
            IntegrationEvent::BookingChanged(e) => &e.source,
            IntegrationEvent::ScheduleChanged(e) => &e.source,
            IntegrationEvent::RecurrenceGroupChanged(e) => &e.source,
            IntegrationEvent::TimeOffChanged(e) => &e.source,
        }
    }

    pub fn actor(&self) -> &Actor {
        match self {
            IntegrationEvent::BookingChanged(e) => &e.actor,
            IntegrationEvent::ScheduleChanged(e) => &e.actor,
            IntegrationEvent::RecurrenceGroupChanged(e) => &e.actor,
            IntegrationEvent::TimeOffChanged(e) => &e.actor,
        }
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        let source = self.source();
        IdempotencyKey {
            source_id: source.source_id,
            fact_type: source.fact_type.clone(),
            source_version: source.source_version,
        }
    }
}

/// Translates one stored fact, given the creation fact of its aggregate.
///
/// Returns None for aggregate types that publish nothing.
pub fn translate(event: &EventEnvelope, creation: &EventEnvelope) -> Result<Option<IntegrationEvent>> {
    let source = EventSource {
        source_id: event.aggregate_id,
        source_version: event.version,
        sequence: event.sequence,
        fact_type: event.event_type.clone(),
        occurred_at: event.timestamp,
    };

    let translated = match event.aggregate_type.as_str() {
        t if t == Booking::aggregate_type() => {
            Some(IntegrationEvent::BookingChanged(booking_changed(source, event, creation)?))
        }
        t if t == Schedule::aggregate_type() => {
            Some(IntegrationEvent::ScheduleChanged(schedule_changed(source, event, creation)?))
        }
        t if t == RecurrenceGroup::aggregate_type() => Some(
            IntegrationEvent::RecurrenceGroupChanged(group_changed(source, event, creation)?),
        ),
        t if t == TimeOff::aggregate_type() => {
            Some(IntegrationEvent::TimeOffChanged(time_off_changed(source, event, creation)?))
        }
        _ => None,
    };
    Ok(translated)
}

fn missing_creation(event: &EventEnvelope) -> ProjectionError {
    ProjectionError::MissingCreation {
        aggregate_type: event.aggregate_type.clone(),
        aggregate_id: event.aggregate_id,
    }
}

fn booking_changed(
    source: EventSource,
    event: &EventEnvelope,
    creation: &EventEnvelope,
) -> Result<BookingChanged> {
    let BookingEvent::BookingCreated(created) = creation.decode::<BookingEvent>()? else {
        return Err(missing_creation(event));
    };

    let (actor, previous, new, classification, reason) = match event.decode::<BookingEvent>()? {
        BookingEvent::BookingCreated(data) => (data.actor, None, data.status, None, None),
        BookingEvent::BookingConfirmed(t)
        | BookingEvent::BookingRejected(t)
        | BookingEvent::BookingCancelled(t)
        | BookingEvent::BookingAttended(t)
        | BookingEvent::BookingNoShow(t) => {
            (t.actor, Some(t.previous), t.new, t.classification, t.reason)
        }
    };

    Ok(BookingChanged {
        source,
        actor,
        schedule_id: created.schedule_id,
        user_id: created.user_id,
        booking_type: created.booking_type,
        previous,
        new,
        classification,
        reason,
        ticket_id: created.ticket_id,
        group_id: created.group_id,
        trainer_id: created.slot.trainer_id,
        window: created.slot.window,
        title: created.slot.title,
    })
}

fn schedule_changed(
    source: EventSource,
    event: &EventEnvelope,
    creation: &EventEnvelope,
) -> Result<ScheduleChanged> {
    let (trainer_id, window, title, group_id) = match creation.decode::<ScheduleEvent>()? {
        ScheduleEvent::ScheduleOpened(d) => {
            (d.trainer_id, d.window, d.title, d.recurrence.map(|r| r.group_id))
        }
        ScheduleEvent::PersonalSlotReserved(d) => (d.trainer_id, d.window, d.title, None),
        _ => return Err(missing_creation(event)),
    };

    let (actor, previous, new, capacity, booking_id) = match event.decode::<ScheduleEvent>()? {
        ScheduleEvent::ScheduleOpened(d) => (d.actor, None, ScheduleStatus::Open, d.capacity, None),
        ScheduleEvent::PersonalSlotReserved(d) => {
            (d.actor, None, ScheduleStatus::Reserved, 0, Some(d.booking_id))
        }
        ScheduleEvent::SeatReserved(c)
        | ScheduleEvent::SeatReleased(c)
        | ScheduleEvent::ScheduleClosed(c)
        | ScheduleEvent::ScheduleReopened(c)
        | ScheduleEvent::CapacityMirrored(c)
        | ScheduleEvent::ScheduleCancelled(c)
        | ScheduleEvent::ScheduleFinished(c) => {
            (c.actor, Some(c.previous), c.new, c.capacity, c.booking_id)
        }
    };

    Ok(ScheduleChanged {
        source,
        actor,
        previous,
        new,
        capacity,
        booking_id,
        group_id,
        trainer_id,
        window,
        title,
    })
}

fn group_changed(
    source: EventSource,
    event: &EventEnvelope,
    creation: &EventEnvelope,
) -> Result<RecurrenceGroupChanged> {
    let RecurrenceEvent::RecurrenceGroupCreated(created) = creation.decode::<RecurrenceEvent>()?
    else {
        return Err(missing_creation(event));
    };
    let (Some(first), Some(last)) = (created.children.first(), created.children.last()) else {
        return Err(missing_creation(event));
    };
    let window = TimeRange::new(first.window.start(), last.window.end())
        .map_err(|e| ProjectionError::Projection(e.to_string()))?;
    let children = created.children.iter().map(|c| c.schedule_id).collect();

    let changed = match event.decode::<RecurrenceEvent>()? {
        RecurrenceEvent::RecurrenceGroupCreated(d) => RecurrenceGroupChanged {
            source,
            actor: d.actor,
            previous: None,
            new: RecurrenceStatus::Open,
            remaining_capacity: d.template_capacity,
            user_id: None,
            booking_ids: Vec::new(),
            classification: None,
            refunded_tickets: Vec::new(),
            children,
            trainer_id: created.trainer_id,
            window,
            title: created.title,
            reason: None,
        },
        RecurrenceEvent::PoolSeatReserved(c)
        | RecurrenceEvent::PoolSeatReleased(c)
        | RecurrenceEvent::RecurrenceGroupCancelled(c)
        | RecurrenceEvent::RecurrenceGroupFinished(c) => RecurrenceGroupChanged {
            source,
            actor: c.actor,
            previous: Some(c.previous),
            new: c.new,
            remaining_capacity: c.remaining_capacity,
            user_id: c.user_id,
            booking_ids: c.booking_ids,
            classification: c.classification,
            refunded_tickets: c.refunded_tickets,
            children,
            trainer_id: created.trainer_id,
            window,
            title: created.title,
            reason: c.reason,
        },
    };
    Ok(changed)
}

fn time_off_changed(
    source: EventSource,
    event: &EventEnvelope,
    creation: &EventEnvelope,
) -> Result<TimeOffChanged> {
    let TimeOffEvent::TimeOffRegistered(registered) = creation.decode::<TimeOffEvent>()? else {
        return Err(missing_creation(event));
    };

    let (actor, previous, new) = match event.decode::<TimeOffEvent>()? {
        TimeOffEvent::TimeOffRegistered(d) => (d.actor, None, TimeOffStatus::Active),
        TimeOffEvent::TimeOffRemoved(d) => {
            (d.actor, Some(TimeOffStatus::Active), TimeOffStatus::Removed)
        }
    };

    Ok(TimeOffChanged {
        source,
        actor,
        previous,
        new,
        trainer_id: registered.trainer_id,
        window: registered.window,
        reason: registered.reason,
    })
}

/// Receives integration events after the originating write committed.
///
/// Delivery is at least once and facts from different commits may arrive in
/// any order; implementations must be idempotent.
#[async_trait]
pub trait IntegrationHandler: Send + Sync {
    /// Returns the name of this handler.
    fn name(&self) -> &'static str;

    /// Handles one integration event.
    async fn handle(&self, event: &IntegrationEvent) -> Result<()>;
}

/// Translates stored facts, fetching creation facts from the store.
pub struct IntegrationTranslator<S: EventStore> {
    store: S,
    creations: RwLock<HashMap<AggregateId, EventEnvelope>>,
}

impl<S: EventStore> IntegrationTranslator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            creations: RwLock::new(HashMap::new()),
        }
    }

    /// Translates one fact, or returns None if its aggregate publishes nothing.
    pub async fn translate(&self, event: &EventEnvelope) -> Result<Option<IntegrationEvent>> {
        if event.version == Version::first() {
            return translate(event, event);
        }
        let creation = self.creation_for(event).await?;
        translate(event, &creation)
    }

    async fn creation_for(&self, event: &EventEnvelope) -> Result<EventEnvelope> {
        if let Some(creation) = self.creations.read().await.get(&event.aggregate_id) {
            return Ok(creation.clone());
        }

        let creation = self
            .store
            .query_events(EventQuery::for_aggregate(event.aggregate_id).limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| missing_creation(event))?;

        // Creation facts are immutable
        self.creations
            .write()
            .await
            .insert(event.aggregate_id, creation.clone());
        Ok(creation)
    }
}
