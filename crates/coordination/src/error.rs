//! Coordination error types.

use domain::{DomainError, ErrorKind};
use projections::ProjectionError;
use thiserror::Error;

use crate::services::{AvailabilityError, MembershipError, TicketError, TrainerError};

/// Errors returned by the coordinators.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// A domain rule rejected the command, or the commit lost a race.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The write committed but the audit trail could not record it.
    #[error("Audit failed after commit: {0}")]
    Audit(#[from] ProjectionError),

    #[error("Ticket ledger error: {0}")]
    Ticket(#[from] TicketError),

    #[error("Membership error: {0}")]
    Membership(#[from] MembershipError),

    #[error("Trainer error: {0}")]
    Trainer(#[from] TrainerError),

    #[error("Availability error: {0}")]
    Availability(#[from] AvailabilityError),
}

impl CoordinationError {
    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinationError::Domain(e) => e.kind(),
            CoordinationError::Audit(_) => ErrorKind::Internal,
            CoordinationError::Ticket(TicketError::Exhausted { .. }) => ErrorKind::PolicyViolation,
            CoordinationError::Ticket(TicketError::Conflict { .. }) => {
                ErrorKind::ConcurrencyConflict
            }
            CoordinationError::Ticket(TicketError::UnknownTicket { .. }) => ErrorKind::NotFound,
            CoordinationError::Membership(_) => ErrorKind::PolicyViolation,
            CoordinationError::Trainer(_) => ErrorKind::AccessDenied,
            CoordinationError::Availability(_) => ErrorKind::PolicyViolation,
        }
    }

    /// Returns true if the caller may retry the whole command.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ConcurrencyConflict
    }
}

/// Convenience type alias for coordination results.
pub type Result<T> = std::result::Result<T, CoordinationError>;
