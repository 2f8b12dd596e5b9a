//! Schedule aggregate: one concrete slot occurrence and its seats.

mod aggregate;
mod events;
mod state;

pub use aggregate::{OpenSchedule, PersonalSlot, Schedule};
pub use events::{
    PersonalSlotReservedData, RecurrenceLink, ScheduleChangeData, ScheduleEvent,
    ScheduleOpenedData,
};
pub use state::ScheduleStatus;

use chrono::{DateTime, Utc};
use common::AggregateId;
use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during schedule operations.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Schedule already created")]
    AlreadyCreated,

    #[error("Schedule has not been created")]
    NotCreated,

    #[error("Invalid capacity: {capacity} (must be greater than 0)")]
    InvalidCapacity { capacity: u32 },

    /// Schedule is not in a status that allows the action.
    #[error("Cannot {action} a {current} schedule")]
    InvalidStatus {
        current: ScheduleStatus,
        action: &'static str,
    },

    #[error("No seats left")]
    CapacityExceeded,

    /// Curriculum occurrences take reservations through their group's pool.
    #[error("Curriculum occurrences are reserved through their program")]
    ReservationNotAllowedForCurriculum,

    #[error("Deadline exceeded: changes closed at {deadline}")]
    DeadlineExceeded { deadline: DateTime<Utc> },

    #[error("Booking {booking_id} already holds a seat")]
    SeatAlreadyHeld { booking_id: AggregateId },

    #[error("Booking {booking_id} holds no seat")]
    SeatNotHeld { booking_id: AggregateId },

    /// Releasing would push free seats past the slot's total.
    #[error("All {max_capacity} seats are already free")]
    CapacityOverflow { max_capacity: u32 },

    #[error("Schedule is not part of a curriculum program")]
    NotCurriculum,

    /// Open/closed state of curriculum occurrences follows the pool.
    #[error("Schedule is managed by its recurrence group")]
    ManagedByGroup,

    #[error("Schedule has already started")]
    CannotChangePastSchedule,

    #[error("Schedule ends at {ends_at}")]
    NotEnded { ends_at: DateTime<Utc> },
}

impl ScheduleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScheduleError::AlreadyCreated
            | ScheduleError::InvalidCapacity { .. }
            | ScheduleError::SeatAlreadyHeld { .. }
            | ScheduleError::SeatNotHeld { .. }
            | ScheduleError::NotCurriculum => ErrorKind::Validation,
            ScheduleError::NotCreated => ErrorKind::NotFound,
            ScheduleError::InvalidStatus { .. }
            | ScheduleError::CapacityExceeded
            | ScheduleError::ReservationNotAllowedForCurriculum
            | ScheduleError::DeadlineExceeded { .. }
            | ScheduleError::CapacityOverflow { .. }
            | ScheduleError::ManagedByGroup
            | ScheduleError::CannotChangePastSchedule
            | ScheduleError::NotEnded { .. } => ErrorKind::PolicyViolation,
        }
    }
}
