//! Recurrence group domain events.

use chrono::{DateTime, Utc};
use common::{Actor, AggregateId, TemplateId, TicketId, TimeRange, TrainerId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::policy::CancellationClass;

use super::{RecurrencePattern, RecurrenceStatus, RecurrenceType};

/// One occurrence spawned by a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildOccurrence {
    pub schedule_id: AggregateId,
    pub window: TimeRange,
}

/// Events that can occur on a recurrence group aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RecurrenceEvent {
    /// The program was created and its occurrences laid out.
    RecurrenceGroupCreated(RecurrenceGroupCreatedData),

    /// A member enrolled and took one seat from the pool.
    PoolSeatReserved(PoolChangeData),

    /// A member left and returned their seat to the pool.
    PoolSeatReleased(PoolChangeData),

    /// The program was withdrawn.
    RecurrenceGroupCancelled(PoolChangeData),

    /// The program is over.
    RecurrenceGroupFinished(PoolChangeData),
}

impl DomainEvent for RecurrenceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RecurrenceEvent::RecurrenceGroupCreated(_) => "RecurrenceGroupCreated",
            RecurrenceEvent::PoolSeatReserved(_) => "PoolSeatReserved",
            RecurrenceEvent::PoolSeatReleased(_) => "PoolSeatReleased",
            RecurrenceEvent::RecurrenceGroupCancelled(_) => "RecurrenceGroupCancelled",
            RecurrenceEvent::RecurrenceGroupFinished(_) => "RecurrenceGroupFinished",
        }
    }
}

/// Data for RecurrenceGroupCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceGroupCreatedData {
    pub group_id: AggregateId,
    pub trainer_id: TrainerId,
    pub template_id: TemplateId,
    pub title: String,
    pub pattern: RecurrencePattern,
    pub recurrence_type: RecurrenceType,

    /// Seats per occurrence; also the size of the pool.
    pub template_capacity: u32,

    /// Occurrences in date order.
    pub children: Vec<ChildOccurrence>,

    pub actor: Actor,
    pub created_at: DateTime<Utc>,
}

/// Data shared by every change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolChangeData {
    pub previous: RecurrenceStatus,
    pub new: RecurrenceStatus,

    /// Pool seats left after the change.
    pub remaining_capacity: u32,

    /// Member whose enrollment moved, for seat facts.
    pub user_id: Option<UserId>,

    /// Bookings covered by the enrollment, one per occurrence.
    #[serde(default)]
    pub booking_ids: Vec<AggregateId>,

    /// The one ticket paying for an enrollment, on seat facts.
    #[serde(default)]
    pub ticket_id: Option<TicketId>,

    /// How a departure from the pool was classified.
    #[serde(default)]
    pub classification: Option<CancellationClass>,

    /// Tickets owed back because the enrollments they paid for ended free.
    #[serde(default)]
    pub refunded_tickets: Vec<TicketId>,

    pub actor: Actor,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl RecurrenceEvent {
    /// Returns the change data, or None for the creation fact.
    pub fn change(&self) -> Option<&PoolChangeData> {
        match self {
            RecurrenceEvent::RecurrenceGroupCreated(_) => None,
            RecurrenceEvent::PoolSeatReserved(data)
            | RecurrenceEvent::PoolSeatReleased(data)
            | RecurrenceEvent::RecurrenceGroupCancelled(data)
            | RecurrenceEvent::RecurrenceGroupFinished(data) => Some(data),
        }
    }
}
