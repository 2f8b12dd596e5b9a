//! Booking aggregate and related types.

mod aggregate;
mod events;
mod state;

pub use aggregate::{Booking, NewBooking};
pub use events::{BookingCreatedData, BookingEvent, BookingTransitionData, SlotContext};
pub use state::{BookingStatus, BookingType};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during booking operations.
#[derive(Debug, Error)]
pub enum BookingError {
    /// Booking is already created.
    #[error("Booking already created")]
    AlreadyCreated,

    /// The booking has no creation fact yet.
    #[error("Booking has not been created")]
    NotCreated,

    /// Reservations for this tier closed at `deadline`.
    #[error("Reservation deadline exceeded: bookings closed at {deadline}")]
    DeadlineExceeded { deadline: DateTime<Utc> },

    #[error("Booking is {current}, expected PENDING")]
    NotPendingStatus { current: BookingStatus },

    #[error("Booking is {current}, expected CONFIRMED")]
    NotConfirmedStatus { current: BookingStatus },

    /// The booking is in a terminal state.
    #[error("Booking is already closed ({current})")]
    AlreadyCancelled { current: BookingStatus },

    /// Too late to cancel.
    #[error("Cancellation is no longer allowed")]
    CancellationNotAllowed,

    /// Curriculum bookings are only cancelled with their whole program.
    #[error("Curriculum bookings must be cancelled as a program")]
    CurriculumRequiresBatch,

    #[error("Check-in opens at {opens_at}")]
    CheckInTooEarly { opens_at: DateTime<Utc> },

    #[error("Check-in distance {distance}m exceeds {max}m")]
    CheckInDistanceExceeded { distance: f64, max: f64 },

    #[error("Invalid check-in distance: {distance}")]
    InvalidDistance { distance: f64 },

    /// A member tried to act on someone else's booking.
    #[error("Booking belongs to another member")]
    NotOwner,
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::AlreadyCreated | BookingError::InvalidDistance { .. } => {
                ErrorKind::Validation
            }
            BookingError::NotCreated => ErrorKind::NotFound,
            BookingError::NotOwner => ErrorKind::AccessDenied,
            BookingError::DeadlineExceeded { .. }
            | BookingError::NotPendingStatus { .. }
            | BookingError::NotConfirmedStatus { .. }
            | BookingError::AlreadyCancelled { .. }
            | BookingError::CancellationNotAllowed
            | BookingError::CurriculumRequiresBatch
            | BookingError::CheckInTooEarly { .. }
            | BookingError::CheckInDistanceExceeded { .. } => ErrorKind::PolicyViolation,
        }
    }
}
