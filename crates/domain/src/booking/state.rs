//! Booking state machine.

use serde::{Deserialize, Serialize};

use crate::policy::ReservationTier;

/// The status of a booking in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Confirmed ──┬──► Attended
///           │        │       └──► NoShow
///           │        └──────────► Cancelled
///           ├──► Rejected
///           └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Waiting for trainer approval.
    #[default]
    Pending,

    /// The seat is held for the member.
    Confirmed,

    /// The trainer declined the booking (terminal).
    Rejected,

    /// Cancelled by the member, the trainer or a cascade (terminal).
    Cancelled,

    /// The member checked in (terminal).
    Attended,

    /// The member did not show up (terminal).
    #[serde(rename = "NOSHOW")]
    NoShow,
}

impl BookingStatus {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected
                | BookingStatus::Cancelled
                | BookingStatus::Attended
                | BookingStatus::NoShow
        )
    }

    /// Returns true if the booking still holds a seat or pool place.
    pub fn holds_capacity(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Attended => "ATTENDED",
            BookingStatus::NoShow => "NOSHOW",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What kind of slot a booking reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingType {
    /// A 1:1 session; the slot is created by the booking itself.
    #[default]
    Personal,

    /// One seat in a standalone or routine group class.
    GroupRoutine,

    /// One place in a curriculum program, covering every occurrence.
    GroupCurriculum,
}

impl BookingType {
    /// The tier a booking of this type is made under unless told otherwise.
    pub fn default_tier(&self) -> ReservationTier {
        match self {
            BookingType::Personal => ReservationTier::ApprovalRequired,
            BookingType::GroupRoutine | BookingType::GroupCurriculum => {
                ReservationTier::AutoConfirm
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingType::Personal => "PERSONAL",
            BookingType::GroupRoutine => "GROUP_ROUTINE",
            BookingType::GroupCurriculum => "GROUP_CURRICULUM",
        }
    }
}

impl std::fmt::Display for BookingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
