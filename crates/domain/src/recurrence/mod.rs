//! Recurrence group aggregate: a recurring program and its shared seat pool.

mod aggregate;
mod events;
mod pattern;
mod state;

pub use aggregate::{CreateRecurrenceGroup, RecurrenceGroup};
pub use events::{ChildOccurrence, PoolChangeData, RecurrenceEvent, RecurrenceGroupCreatedData};
pub use pattern::{MAX_SPAN_MONTHS, RecurrencePattern, resolve_local};
pub use state::{RecurrenceStatus, RecurrenceType};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use common::UserId;
use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during recurrence group operations.
#[derive(Debug, Error)]
pub enum RecurrenceError {
    #[error("Recurrence group already created")]
    AlreadyCreated,

    #[error("Recurrence group has not been created")]
    NotCreated,

    #[error("End date {end_date} is before start date {start_date}")]
    InvalidDateRange {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },

    #[error("Program is too long: must end by {max_end}")]
    SpanTooLong { max_end: NaiveDate },

    #[error("At least one repeat day is required")]
    NoRepeatDays,

    #[error("Invalid capacity: {capacity} (must be greater than 0)")]
    InvalidCapacity { capacity: u32 },

    #[error("Invalid duration: {minutes} minutes")]
    InvalidDuration { minutes: u32 },

    #[error("Local time {local} cannot be resolved in the program's timezone")]
    UnresolvableLocalTime { local: NaiveDateTime },

    #[error("Pattern produces no occurrences")]
    NoOccurrences,

    /// Only curriculum programs hand out seats from the pool.
    #[error("Pool reservations are only for curriculum programs")]
    NotCurriculum,

    #[error("Cannot {action} a {current} program")]
    InvalidStatus {
        current: RecurrenceStatus,
        action: &'static str,
    },

    #[error("No seats left in the program")]
    CapacityExceeded,

    /// Members cannot join once the first day has arrived.
    #[error("Program started on {start_date}")]
    ProgramAlreadyStarted { start_date: NaiveDate },

    #[error("Member {user_id} is already enrolled")]
    AlreadyEnrolled { user_id: UserId },

    #[error("Member {user_id} is not enrolled")]
    NotEnrolled { user_id: UserId },

    /// Returning a seat would overfill the pool.
    #[error("Pool already holds all {capacity} seats")]
    CancelCapacityError { capacity: u32 },

    #[error("Program ends at {ends_at}")]
    NotEnded { ends_at: DateTime<Utc> },
}

impl RecurrenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecurrenceError::AlreadyCreated
            | RecurrenceError::InvalidDateRange { .. }
            | RecurrenceError::SpanTooLong { .. }
            | RecurrenceError::NoRepeatDays
            | RecurrenceError::InvalidCapacity { .. }
            | RecurrenceError::InvalidDuration { .. }
            | RecurrenceError::UnresolvableLocalTime { .. }
            | RecurrenceError::NoOccurrences
            | RecurrenceError::NotCurriculum
            | RecurrenceError::AlreadyEnrolled { .. }
            | RecurrenceError::NotEnrolled { .. } => ErrorKind::Validation,
            RecurrenceError::NotCreated => ErrorKind::NotFound,
            RecurrenceError::InvalidStatus { .. }
            | RecurrenceError::CapacityExceeded
            | RecurrenceError::ProgramAlreadyStarted { .. }
            | RecurrenceError::CancelCapacityError { .. }
            | RecurrenceError::NotEnded { .. } => ErrorKind::PolicyViolation,
        }
    }
}
