//! Cancellation and deadline policy.
//!
//! Everything here is a pure function of the instants passed in. Callers read
//! `now` once per operation and hand it down, so a classification never
//! changes halfway through a command.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::BookingStatus;

/// A cancellation within this long of booking is always free.
pub const MISCLICK_GRACE_MINUTES: i64 = 10;

/// Cancelling at least this long before class start is free.
pub const FREE_CANCEL_WINDOW_HOURS: i64 = 24;

/// Cancelling inside the free window but at least this long before class
/// start keeps the ticket consumed.
pub const PENALTY_CANCEL_WINDOW_HOURS: i64 = 1;

/// Curriculum programs can only be cancelled as a whole up to this long
/// before their first occurrence.
pub const BATCH_CANCEL_WINDOW_HOURS: i64 = 3;

/// Approval-required reservations close this long before class start.
pub const APPROVAL_REQUIRED_DEADLINE_HOURS: i64 = 3;

/// Auto-confirmed reservations close this long before class start.
pub const AUTO_CONFIRM_DEADLINE_HOURS: i64 = 1;

/// Trainers cannot cancel a slot later than this before it starts, unless
/// the cancellation is forced.
pub const SCHEDULE_CANCEL_DEADLINE_HOURS: i64 = 24;

/// Check-in opens this long before class start.
pub const CHECK_IN_OPENS_MINUTES: i64 = 15;

/// Maximum distance in metres between member and venue at check-in.
pub const MAX_CHECK_IN_DISTANCE_METRES: f64 = 150.0;

/// Outcome of classifying a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationClass {
    /// Cancelled without penalty; the ticket goes back to the member.
    FreeCancel,
    /// Cancelled, but the ticket stays consumed.
    PenaltyCancel,
    /// Too late to cancel.
    Impossible,
}

impl CancellationClass {
    /// Returns true if the consumed ticket should be restored.
    pub fn restores_ticket(&self) -> bool {
        matches!(self, CancellationClass::FreeCancel)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationClass::FreeCancel => "FREE_CANCEL",
            CancellationClass::PenaltyCancel => "PENALTY_CANCEL",
            CancellationClass::Impossible => "IMPOSSIBLE",
        }
    }
}

impl std::fmt::Display for CancellationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reservation policy class a booking is made under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationTier {
    /// The trainer approves each booking (e.g. free trials).
    #[default]
    ApprovalRequired,
    /// Bookings are confirmed immediately (e.g. paid tickets).
    AutoConfirm,
}

impl ReservationTier {
    /// How long before class start reservations under this tier close.
    pub fn deadline(&self) -> Duration {
        match self {
            ReservationTier::ApprovalRequired => {
                Duration::hours(APPROVAL_REQUIRED_DEADLINE_HOURS)
            }
            ReservationTier::AutoConfirm => Duration::hours(AUTO_CONFIRM_DEADLINE_HOURS),
        }
    }

    pub fn initial_status(&self) -> BookingStatus {
        determine_initial_status(*self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationTier::ApprovalRequired => "APPROVAL_REQUIRED",
            ReservationTier::AutoConfirm => "AUTO_CONFIRM",
        }
    }
}

impl std::fmt::Display for ReservationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status a new booking starts in.
pub fn determine_initial_status(tier: ReservationTier) -> BookingStatus {
    match tier {
        ReservationTier::ApprovalRequired => BookingStatus::Pending,
        ReservationTier::AutoConfirm => BookingStatus::Confirmed,
    }
}

/// Returns the last instant a reservation under `tier` is accepted.
pub fn booking_deadline(tier: ReservationTier, class_start: DateTime<Utc>) -> DateTime<Utc> {
    class_start - tier.deadline()
}

/// Returns true if `now` is past the reservation deadline for `tier`.
pub fn booking_deadline_passed(
    tier: ReservationTier,
    now: DateTime<Utc>,
    class_start: DateTime<Utc>,
) -> bool {
    now > booking_deadline(tier, class_start)
}

/// Classifies a single cancellation.
///
/// Rules are checked in order and the first match wins:
/// 1. within the misclick grace period after booking: free
/// 2. at or before `class_start - 24h`: free
/// 3. at or before `class_start - 1h`: penalty
/// 4. otherwise impossible
pub fn classify(
    booked_at: DateTime<Utc>,
    now: DateTime<Utc>,
    class_start: DateTime<Utc>,
) -> CancellationClass {
    if now - booked_at <= Duration::minutes(MISCLICK_GRACE_MINUTES) {
        return CancellationClass::FreeCancel;
    }
    if now <= class_start - Duration::hours(FREE_CANCEL_WINDOW_HOURS) {
        return CancellationClass::FreeCancel;
    }
    if now <= class_start - Duration::hours(PENALTY_CANCEL_WINDOW_HOURS) {
        return CancellationClass::PenaltyCancel;
    }
    CancellationClass::Impossible
}

/// Returns true if a curriculum program may still be cancelled as a whole.
pub fn batch_cancellation_allowed(now: DateTime<Utc>, first_occurrence_start: DateTime<Utc>) -> bool {
    now <= first_occurrence_start - Duration::hours(BATCH_CANCEL_WINDOW_HOURS)
}

/// Classifies a curriculum batch cancellation.
///
/// The gate and the classification are both evaluated against the first
/// occurrence only; every booking in the batch shares the result. Returns
/// `None` once the gate has closed.
pub fn classify_batch(
    booked_at: DateTime<Utc>,
    now: DateTime<Utc>,
    first_occurrence_start: DateTime<Utc>,
) -> Option<CancellationClass> {
    if !batch_cancellation_allowed(now, first_occurrence_start) {
        return None;
    }
    Some(classify(booked_at, now, first_occurrence_start))
}

/// Returns the instant check-in opens for a class.
pub fn check_in_opens_at(class_start: DateTime<Utc>) -> DateTime<Utc> {
    class_start - Duration::minutes(CHECK_IN_OPENS_MINUTES)
}

/// Returns true if a trainer may still cancel a slot without forcing it.
pub fn schedule_cancellation_allowed(
    now: DateTime<Utc>,
    slot_start: DateTime<Utc>,
    deadline: Duration,
) -> bool {
    now <= slot_start - deadline
}
