//! Recurrence group status and type.

use serde::{Deserialize, Serialize};

/// How a recurring program hands out seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceType {
    /// Every occurrence is booked on its own against its own seats.
    #[default]
    Routine,

    /// Members enroll in the whole program from one shared pool.
    Curriculum,
}

impl RecurrenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceType::Routine => "ROUTINE",
            RecurrenceType::Curriculum => "CURRICULUM",
        }
    }
}

impl std::fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The status of a recurrence group.
///
/// State transitions:
/// ```text
/// Open ◄──► Closed
///   │         │
///   ├─────────┴──► Cancelled
///   └─────────┴──► Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceStatus {
    #[default]
    Open,

    /// The pool is empty.
    Closed,

    /// Withdrawn with all its occurrences (terminal).
    Cancelled,

    /// The program is over (terminal).
    Finished,
}

impl RecurrenceStatus {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecurrenceStatus::Cancelled | RecurrenceStatus::Finished)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceStatus::Open => "OPEN",
            RecurrenceStatus::Closed => "CLOSED",
            RecurrenceStatus::Cancelled => "CANCELLED",
            RecurrenceStatus::Finished => "FINISHED",
        }
    }
}

impl std::fmt::Display for RecurrenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
