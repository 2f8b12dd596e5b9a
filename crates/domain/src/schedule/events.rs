//! Schedule domain events.

use chrono::{DateTime, Utc};
use common::{Actor, AggregateId, TemplateId, TimeRange, TrainerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::recurrence::RecurrenceType;

use super::ScheduleStatus;

/// Link from a child occurrence to the recurrence group that spawned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceLink {
    pub group_id: AggregateId,
    pub recurrence_type: RecurrenceType,
}

/// Events that can occur on a schedule aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ScheduleEvent {
    /// A group slot was published with its seats.
    ScheduleOpened(ScheduleOpenedData),

    /// A 1:1 slot was created already taken by its booking.
    PersonalSlotReserved(PersonalSlotReservedData),

    /// One seat was taken.
    SeatReserved(ScheduleChangeData),

    /// One seat was given back.
    SeatReleased(ScheduleChangeData),

    /// The trainer stopped accepting bookings.
    ScheduleClosed(ScheduleChangeData),

    /// The trainer resumed accepting bookings.
    ScheduleReopened(ScheduleChangeData),

    /// Seat count and status were copied from the recurrence group pool.
    CapacityMirrored(ScheduleChangeData),

    /// The slot was withdrawn.
    ScheduleCancelled(ScheduleChangeData),

    /// The slot is over.
    ScheduleFinished(ScheduleChangeData),
}

impl DomainEvent for ScheduleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ScheduleEvent::ScheduleOpened(_) => "ScheduleOpened",
            ScheduleEvent::PersonalSlotReserved(_) => "PersonalSlotReserved",
            ScheduleEvent::SeatReserved(_) => "SeatReserved",
            ScheduleEvent::SeatReleased(_) => "SeatReleased",
            ScheduleEvent::ScheduleClosed(_) => "ScheduleClosed",
            ScheduleEvent::ScheduleReopened(_) => "ScheduleReopened",
            ScheduleEvent::CapacityMirrored(_) => "CapacityMirrored",
            ScheduleEvent::ScheduleCancelled(_) => "ScheduleCancelled",
            ScheduleEvent::ScheduleFinished(_) => "ScheduleFinished",
        }
    }
}

/// Data for ScheduleOpened event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleOpenedData {
    pub schedule_id: AggregateId,
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub title: String,

    /// Total seats; the slot starts with all of them free.
    pub capacity: u32,

    pub template_id: Option<TemplateId>,
    pub recurrence: Option<RecurrenceLink>,
    pub actor: Actor,
    pub opened_at: DateTime<Utc>,
}

/// Data for PersonalSlotReserved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalSlotReservedData {
    pub schedule_id: AggregateId,
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub title: String,

    /// The booking occupying the slot.
    pub booking_id: AggregateId,

    pub actor: Actor,
    pub reserved_at: DateTime<Utc>,
}

/// Data shared by every change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleChangeData {
    pub previous: ScheduleStatus,
    pub new: ScheduleStatus,

    /// Remaining seats after the change.
    pub capacity: u32,

    /// The booking whose seat moved, for seat facts.
    pub booking_id: Option<AggregateId>,

    pub actor: Actor,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl ScheduleEvent {
    /// Returns the change data, or None for creation facts.
    pub fn change(&self) -> Option<&ScheduleChangeData> {
        match self {
            ScheduleEvent::ScheduleOpened(_) | ScheduleEvent::PersonalSlotReserved(_) => None,
            ScheduleEvent::SeatReserved(data)
            | ScheduleEvent::SeatReleased(data)
            | ScheduleEvent::ScheduleClosed(data)
            | ScheduleEvent::ScheduleReopened(data)
            | ScheduleEvent::CapacityMirrored(data)
            | ScheduleEvent::ScheduleCancelled(data)
            | ScheduleEvent::ScheduleFinished(data) => Some(data),
        }
    }
}
