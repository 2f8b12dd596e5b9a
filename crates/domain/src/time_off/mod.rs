//! Trainer time-off blocks.
//!
//! Time off does not take part in reservations directly; it exists so the
//! calendar context hears about blocked windows through `TimeOffChanged`.

mod aggregate;
mod events;

pub use aggregate::{RegisterTimeOff, TimeOff, TimeOffStatus};
pub use events::{TimeOffEvent, TimeOffRegisteredData, TimeOffRemovedData};

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during time-off operations.
#[derive(Debug, Error)]
pub enum TimeOffError {
    #[error("Time off already registered")]
    AlreadyCreated,

    #[error("Time off has not been registered")]
    NotCreated,

    #[error("Time off already removed")]
    AlreadyRemoved,
}

impl TimeOffError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TimeOffError::AlreadyCreated => ErrorKind::Validation,
            TimeOffError::NotCreated => ErrorKind::NotFound,
            TimeOffError::AlreadyRemoved => ErrorKind::PolicyViolation,
        }
    }
}
