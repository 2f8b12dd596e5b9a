//! Booking domain events.

use chrono::{DateTime, Utc};
use common::{Actor, AggregateId, TicketId, TimeRange, TrainerId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::policy::{CancellationClass, ReservationTier};

use super::{BookingStatus, BookingType};

/// Slot details copied onto the booking when it is made, so downstream
/// consumers can render a calendar entry without asking the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotContext {
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub title: String,
}

/// Events that can occur on a booking aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BookingEvent {
    /// Booking was made.
    BookingCreated(BookingCreatedData),

    /// Pending booking was approved.
    BookingConfirmed(BookingTransitionData),

    /// Pending booking was declined.
    BookingRejected(BookingTransitionData),

    /// Booking was cancelled.
    BookingCancelled(BookingTransitionData),

    /// Member checked in.
    BookingAttended(BookingTransitionData),

    /// Member did not show up.
    BookingNoShow(BookingTransitionData),
}

impl DomainEvent for BookingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::BookingCreated(_) => "BookingCreated",
            BookingEvent::BookingConfirmed(_) => "BookingConfirmed",
            BookingEvent::BookingRejected(_) => "BookingRejected",
            BookingEvent::BookingCancelled(_) => "BookingCancelled",
            BookingEvent::BookingAttended(_) => "BookingAttended",
            BookingEvent::BookingNoShow(_) => "BookingNoShow",
        }
    }
}

/// Data for BookingCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingCreatedData {
    pub booking_id: AggregateId,

    /// The schedule occurrence reserved. For curriculum enrollments this is
    /// the first occurrence of the program.
    pub schedule_id: AggregateId,

    pub user_id: UserId,
    pub booking_type: BookingType,
    pub tier: ReservationTier,

    /// PENDING or CONFIRMED, decided by the tier.
    pub status: BookingStatus,

    /// Ticket consumed for this booking, if any.
    pub ticket_id: Option<TicketId>,

    pub slot: SlotContext,

    /// Recurrence group the booking belongs to, for curriculum enrollments.
    pub group_id: Option<AggregateId>,

    pub actor: Actor,
    pub created_at: DateTime<Utc>,
}

/// Data shared by every status transition fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingTransitionData {
    pub previous: BookingStatus,
    pub new: BookingStatus,
    pub actor: Actor,
    pub reason: Option<String>,

    /// Set on cancellations only.
    pub classification: Option<CancellationClass>,

    pub changed_at: DateTime<Utc>,
}

impl BookingEvent {
    /// Returns the transition data, or None for the creation fact.
    pub fn transition(&self) -> Option<&BookingTransitionData> {
        match self {
            BookingEvent::BookingCreated(_) => None,
            BookingEvent::BookingConfirmed(data)
            | BookingEvent::BookingRejected(data)
            | BookingEvent::BookingCancelled(data)
            | BookingEvent::BookingAttended(data)
            | BookingEvent::BookingNoShow(data) => Some(data),
        }
    }

    /// Returns the status the booking is in after this fact.
    pub fn new_status(&self) -> BookingStatus {
        match self {
            BookingEvent::BookingCreated(data) => data.status,
            other => other
                .transition()
                .map(|t| t.new)
                .unwrap_or_default(),
        }
    }
}
