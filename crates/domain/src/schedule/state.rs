//! Schedule status.

use serde::{Deserialize, Serialize};

/// The status of a schedule occurrence.
///
/// State transitions:
/// ```text
/// Open ◄──► Closed ──┬──► Finished
///   │                └──► Cancelled
///   └──────────────────► Finished / Cancelled
/// Reserved ──────────┬──► Finished
///                    └──► Cancelled
/// ```
///
/// Closed is entered either when the last seat goes or administratively; only
/// the first kind reopens on its own when a seat comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    /// Seats are available.
    #[default]
    Open,

    /// No seats are available, or the trainer closed bookings.
    Closed,

    /// A 1:1 slot, occupied from the moment it exists.
    Reserved,

    /// Withdrawn by the trainer or a group cascade (terminal).
    Cancelled,

    /// The slot is over (terminal).
    Finished,
}

impl ScheduleStatus {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScheduleStatus::Cancelled | ScheduleStatus::Finished)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Open => "OPEN",
            ScheduleStatus::Closed => "CLOSED",
            ScheduleStatus::Reserved => "RESERVED",
            ScheduleStatus::Cancelled => "CANCELLED",
            ScheduleStatus::Finished => "FINISHED",
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
