//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::booking::BookingError;
use crate::recurrence::RecurrenceError;
use crate::schedule::ScheduleError;
use crate::time_off::TimeOffError;

/// Coarse classification callers map to responses and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input, rejected before any state was touched.
    Validation,
    /// A state, time or capacity rule forbids the operation.
    PolicyViolation,
    /// Another writer moved the stream first; safe to retry.
    ConcurrencyConflict,
    NotFound,
    AccessDenied,
    Internal,
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Booking error: {0}")]
    Booking(#[from] BookingError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Recurrence group error: {0}")]
    Recurrence(#[from] RecurrenceError),

    #[error("Time off error: {0}")]
    TimeOff(#[from] TimeOffError),

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::EventStore(e) if e.is_conflict() => ErrorKind::ConcurrencyConflict,
            DomainError::EventStore(_) => ErrorKind::Internal,
            DomainError::Booking(e) => e.kind(),
            DomainError::Schedule(e) => e.kind(),
            DomainError::Recurrence(e) => e.kind(),
            DomainError::TimeOff(e) => e.kind(),
            DomainError::AggregateNotFound { .. } => ErrorKind::NotFound,
            DomainError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the caller may retry the whole command.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ConcurrencyConflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::Version;

    #[test]
    fn concurrency_conflicts_are_retryable() {
        let err = DomainError::from(EventStoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::new(),
            expected: Version::new(3),
            actual: Version::new(4),
        });

        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn policy_violations_are_not_retryable() {
        let err = DomainError::from(ScheduleError::CapacityExceeded);
        assert_eq!(err.kind(), ErrorKind::PolicyViolation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn missing_aggregate_is_not_found() {
        let err = DomainError::AggregateNotFound {
            aggregate_type: "Booking",
            aggregate_id: AggregateId::new(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn booking_ownership_is_access_denied() {
        let err = DomainError::from(BookingError::NotOwner);
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }
}
