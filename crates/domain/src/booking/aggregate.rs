//! Booking aggregate implementation.

use chrono::{DateTime, Utc};
use common::{Actor, AggregateId, TicketId, UserId};
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::policy::{self, CancellationClass, ReservationTier};

use super::{
    BookingError, BookingEvent, BookingStatus, BookingType, SlotContext,
    events::{BookingCreatedData, BookingTransitionData},
};

/// Everything needed to make a booking.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub booking_id: AggregateId,
    pub schedule_id: AggregateId,
    pub user_id: UserId,
    pub booking_type: BookingType,
    pub tier: ReservationTier,
    pub ticket_id: Option<TicketId>,
    pub slot: SlotContext,
    pub group_id: Option<AggregateId>,
}

/// Booking aggregate root.
///
/// One member's reservation against one slot (or, for curriculum programs,
/// one occurrence of a program enrollment).
#[derive(Debug, Clone, Default)]
pub struct Booking {
    id: Option<AggregateId>,
    version: Version,
    schedule_id: Option<AggregateId>,
    user_id: Option<UserId>,
    status: BookingStatus,
    booking_type: BookingType,
    tier: ReservationTier,
    ticket_id: Option<TicketId>,
    created_at: Option<DateTime<Utc>>,
    slot: Option<SlotContext>,
    group_id: Option<AggregateId>,
}

impl Aggregate for Booking {
    type Event = BookingEvent;
    type Error = BookingError;

    fn aggregate_type() -> &'static str {
        "Booking"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            BookingEvent::BookingCreated(data) => self.apply_created(data),
            BookingEvent::BookingConfirmed(data)
            | BookingEvent::BookingRejected(data)
            | BookingEvent::BookingCancelled(data)
            | BookingEvent::BookingAttended(data)
            | BookingEvent::BookingNoShow(data) => {
                self.status = data.new;
            }
        }
    }
}

// Query methods
impl Booking {
    pub fn schedule_id(&self) -> Option<AggregateId> {
        self.schedule_id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn booking_type(&self) -> BookingType {
        self.booking_type
    }

    pub fn tier(&self) -> ReservationTier {
        self.tier
    }

    pub fn ticket_id(&self) -> Option<TicketId> {
        self.ticket_id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn slot(&self) -> Option<&SlotContext> {
        self.slot.as_ref()
    }

    pub fn group_id(&self) -> Option<AggregateId> {
        self.group_id
    }

    /// Returns true if the booking is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the start of the reserved slot.
    pub fn class_start(&self) -> Option<DateTime<Utc>> {
        self.slot.as_ref().map(|s| s.window.start())
    }
}

// Command methods (return events)
impl Booking {
    /// Makes a booking. The tier decides whether it starts PENDING or
    /// CONFIRMED and how late it may be made.
    pub fn create(
        &self,
        new: NewBooking,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        if self.id.is_some() {
            return Err(BookingError::AlreadyCreated);
        }

        let deadline = policy::booking_deadline(new.tier, new.slot.window.start());
        if now > deadline {
            return Err(BookingError::DeadlineExceeded { deadline });
        }

        Ok(vec![BookingEvent::BookingCreated(BookingCreatedData {
            booking_id: new.booking_id,
            schedule_id: new.schedule_id,
            user_id: new.user_id,
            booking_type: new.booking_type,
            tier: new.tier,
            status: policy::determine_initial_status(new.tier),
            ticket_id: new.ticket_id,
            slot: new.slot,
            group_id: new.group_id,
            actor,
            created_at: now,
        })])
    }

    /// Approves a pending booking.
    pub fn confirm(
        &self,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        self.require_created()?;
        if self.status != BookingStatus::Pending {
            return Err(BookingError::NotPendingStatus {
                current: self.status,
            });
        }

        Ok(vec![BookingEvent::BookingConfirmed(self.transition_to(
            BookingStatus::Confirmed,
            actor,
            None,
            None,
            now,
        ))])
    }

    /// Declines a pending booking.
    pub fn reject(
        &self,
        reason: Option<String>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        self.require_created()?;
        if self.status != BookingStatus::Pending {
            return Err(BookingError::NotPendingStatus {
                current: self.status,
            });
        }

        Ok(vec![BookingEvent::BookingRejected(self.transition_to(
            BookingStatus::Rejected,
            actor,
            reason,
            None,
            now,
        ))])
    }

    /// Cancels on the member's request, classified by the cancellation
    /// policy.
    pub fn cancel(
        &self,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (booked_at, class_start) = self.require_created()?;
        if self.status.is_terminal() {
            return Err(BookingError::AlreadyCancelled {
                current: self.status,
            });
        }
        self.check_owner(&actor)?;
        if self.booking_type == BookingType::GroupCurriculum {
            return Err(BookingError::CurriculumRequiresBatch);
        }

        let classification = policy::classify(booked_at, now, class_start);
        if classification == CancellationClass::Impossible {
            return Err(BookingError::CancellationNotAllowed);
        }

        Ok(vec![BookingEvent::BookingCancelled(self.transition_to(
            BookingStatus::Cancelled,
            actor,
            reason,
            Some(classification),
            now,
        ))])
    }

    /// Cancels as one member of a curriculum batch.
    ///
    /// The batch was already classified against its first occurrence, so this
    /// booking's own slot time is not re-checked.
    pub fn cancel_in_batch(
        &self,
        classification: CancellationClass,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        self.require_created()?;
        if self.status.is_terminal() {
            return Err(BookingError::AlreadyCancelled {
                current: self.status,
            });
        }
        if classification == CancellationClass::Impossible {
            return Err(BookingError::CancellationNotAllowed);
        }

        Ok(vec![BookingEvent::BookingCancelled(self.transition_to(
            BookingStatus::Cancelled,
            actor,
            reason,
            Some(classification),
            now,
        ))])
    }

    /// Cancels because the provider withdrew the slot or program.
    ///
    /// Always free for the member and not bound by the cancellation window.
    pub fn cancel_by_provider(
        &self,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        self.require_created()?;
        if self.status.is_terminal() {
            return Err(BookingError::AlreadyCancelled {
                current: self.status,
            });
        }

        Ok(vec![BookingEvent::BookingCancelled(self.transition_to(
            BookingStatus::Cancelled,
            actor,
            reason,
            Some(CancellationClass::FreeCancel),
            now,
        ))])
    }

    /// Checks the member in. `distance` is metres between member and venue.
    pub fn attend(
        &self,
        distance: f64,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        let (_, class_start) = self.require_created()?;
        if self.status != BookingStatus::Confirmed {
            return Err(BookingError::NotConfirmedStatus {
                current: self.status,
            });
        }
        self.check_owner(&actor)?;
        if !distance.is_finite() || distance < 0.0 {
            return Err(BookingError::InvalidDistance { distance });
        }

        let opens_at = policy::check_in_opens_at(class_start);
        if now < opens_at {
            return Err(BookingError::CheckInTooEarly { opens_at });
        }
        if distance > policy::MAX_CHECK_IN_DISTANCE_METRES {
            return Err(BookingError::CheckInDistanceExceeded {
                distance,
                max: policy::MAX_CHECK_IN_DISTANCE_METRES,
            });
        }

        Ok(vec![BookingEvent::BookingAttended(self.transition_to(
            BookingStatus::Attended,
            actor,
            None,
            None,
            now,
        ))])
    }

    /// Records that a confirmed member never checked in.
    pub fn mark_no_show(
        &self,
        reason: Option<String>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        self.require_created()?;
        if self.status != BookingStatus::Confirmed {
            return Err(BookingError::NotConfirmedStatus {
                current: self.status,
            });
        }

        Ok(vec![BookingEvent::BookingNoShow(self.transition_to(
            BookingStatus::NoShow,
            actor,
            reason,
            None,
            now,
        ))])
    }

    fn require_created(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), BookingError> {
        match (self.created_at, self.class_start()) {
            (Some(created_at), Some(class_start)) => Ok((created_at, class_start)),
            _ => Err(BookingError::NotCreated),
        }
    }

    fn check_owner(&self, actor: &Actor) -> Result<(), BookingError> {
        if let Actor::Member(user_id) = actor
            && Some(*user_id) != self.user_id
        {
            return Err(BookingError::NotOwner);
        }
        Ok(())
    }

    fn transition_to(
        &self,
        new: BookingStatus,
        actor: Actor,
        reason: Option<String>,
        classification: Option<CancellationClass>,
        now: DateTime<Utc>,
    ) -> BookingTransitionData {
        BookingTransitionData {
            previous: self.status,
            new,
            actor,
            reason,
            classification,
            changed_at: now,
        }
    }
}

// Event application helpers
impl Booking {
    fn apply_created(&mut self, data: BookingCreatedData) {
        self.id = Some(data.booking_id);
        self.schedule_id = Some(data.schedule_id);
        self.user_id = Some(data.user_id);
        self.status = data.status;
        self.booking_type = data.booking_type;
        self.tier = data.tier;
        self.ticket_id = data.ticket_id;
        self.created_at = Some(data.created_at);
        self.slot = Some(data.slot);
        self.group_id = data.group_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use common::{TimeRange, TrainerId};

    fn class_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 14, 18, 0, 0).unwrap()
    }

    fn new_booking(user_id: UserId, booking_type: BookingType, tier: ReservationTier) -> NewBooking {
        NewBooking {
            booking_id: AggregateId::new(),
            schedule_id: AggregateId::new(),
            user_id,
            booking_type,
            tier,
            ticket_id: Some(TicketId::new()),
            slot: SlotContext {
                trainer_id: TrainerId::new(),
                window: TimeRange::starting_at(class_start(), Duration::hours(1)).unwrap(),
                title: "Strength basics".to_string(),
            },
            group_id: None,
        }
    }

    fn booked(tier: ReservationTier, booked_at: DateTime<Utc>) -> (Booking, UserId) {
        let user_id = UserId::new();
        let mut booking = Booking::default();
        let events = booking
            .create(
                new_booking(user_id, BookingType::GroupRoutine, tier),
                Actor::Member(user_id),
                booked_at,
            )
            .unwrap();
        booking.apply_events(events);
        (booking, user_id)
    }

    fn confirmed(booked_at: DateTime<Utc>) -> (Booking, UserId) {
        booked(ReservationTier::AutoConfirm, booked_at)
    }

    #[test]
    fn test_approval_required_booking_starts_pending() {
        let (booking, _) = booked(
            ReservationTier::ApprovalRequired,
            class_start() - Duration::hours(4),
        );
        assert_eq!(booking.status(), BookingStatus::Pending);
        assert_eq!(booking.tier(), ReservationTier::ApprovalRequired);
    }

    #[test]
    fn test_auto_confirm_booking_starts_confirmed() {
        let (booking, _) = confirmed(class_start() - Duration::hours(2));
        assert_eq!(booking.status(), BookingStatus::Confirmed);
    }

    #[test]
    fn test_create_after_deadline_fails() {
        let user_id = UserId::new();
        let result = Booking::default().create(
            new_booking(user_id, BookingType::Personal, ReservationTier::ApprovalRequired),
            Actor::Member(user_id),
            class_start() - Duration::hours(2),
        );

        assert!(matches!(
            result,
            Err(BookingError::DeadlineExceeded { deadline }) if deadline == class_start() - Duration::hours(3)
        ));
    }

    #[test]
    fn test_create_twice_fails() {
        let (booking, user_id) = confirmed(class_start() - Duration::days(3));
        let result = booking.create(
            new_booking(user_id, BookingType::GroupRoutine, ReservationTier::AutoConfirm),
            Actor::Member(user_id),
            class_start() - Duration::days(3),
        );
        assert!(matches!(result, Err(BookingError::AlreadyCreated)));
    }

    #[test]
    fn test_confirm_and_reject_require_pending() {
        let now = class_start() - Duration::days(2);
        let (pending, _) = booked(ReservationTier::ApprovalRequired, now);
        let trainer = Actor::Trainer(TrainerId::new());

        let events = pending.confirm(trainer.clone(), now).unwrap();
        assert_eq!(events[0].new_status(), BookingStatus::Confirmed);

        let events = pending
            .reject(Some("full".to_string()), trainer.clone(), now)
            .unwrap();
        assert_eq!(events[0].new_status(), BookingStatus::Rejected);

        let (confirmed, _) = confirmed(now);
        assert!(matches!(
            confirmed.confirm(trainer.clone(), now),
            Err(BookingError::NotPendingStatus {
                current: BookingStatus::Confirmed
            })
        ));
        assert!(matches!(
            confirmed.reject(None, trainer, now),
            Err(BookingError::NotPendingStatus { .. })
        ));
    }

    #[test]
    fn test_cancel_classifies() {
        let booked_at = class_start() - Duration::days(5);

        let (booking, user_id) = confirmed(booked_at);
        let events = booking
            .cancel(Actor::Member(user_id), None, class_start() - Duration::hours(30))
            .unwrap();
        let transition = events[0].transition().unwrap();
        assert_eq!(transition.previous, BookingStatus::Confirmed);
        assert_eq!(transition.new, BookingStatus::Cancelled);
        assert_eq!(transition.classification, Some(CancellationClass::FreeCancel));

        let events = booking
            .cancel(Actor::Member(user_id), None, class_start() - Duration::hours(5))
            .unwrap();
        assert_eq!(
            events[0].transition().unwrap().classification,
            Some(CancellationClass::PenaltyCancel)
        );

        let result = booking.cancel(
            Actor::Member(user_id),
            None,
            class_start() - Duration::minutes(30),
        );
        assert!(matches!(result, Err(BookingError::CancellationNotAllowed)));
    }

    #[test]
    fn test_cancel_terminal_booking_fails() {
        let (mut booking, user_id) = confirmed(class_start() - Duration::days(5));
        let now = class_start() - Duration::days(3);
        let events = booking.cancel(Actor::Member(user_id), None, now).unwrap();
        booking.apply_events(events);

        assert!(matches!(
            booking.cancel(Actor::Member(user_id), None, now),
            Err(BookingError::AlreadyCancelled {
                current: BookingStatus::Cancelled
            })
        ));
        assert!(matches!(
            booking.cancel_by_provider(Actor::system("cascade"), None, now),
            Err(BookingError::AlreadyCancelled { .. })
        ));
    }

    #[test]
    fn test_cancel_someone_elses_booking_fails() {
        let (booking, _) = confirmed(class_start() - Duration::days(5));
        let result = booking.cancel(
            Actor::Member(UserId::new()),
            None,
            class_start() - Duration::days(3),
        );
        assert!(matches!(result, Err(BookingError::NotOwner)));
    }

    #[test]
    fn test_curriculum_booking_needs_batch_cancel() {
        let user_id = UserId::new();
        let booked_at = class_start() - Duration::days(10);
        let mut booking = Booking::default();
        let events = booking
            .create(
                new_booking(user_id, BookingType::GroupCurriculum, ReservationTier::AutoConfirm),
                Actor::Member(user_id),
                booked_at,
            )
            .unwrap();
        booking.apply_events(events);

        let now = class_start() - Duration::days(4);
        assert!(matches!(
            booking.cancel(Actor::Member(user_id), None, now),
            Err(BookingError::CurriculumRequiresBatch)
        ));

        // Even an occurrence inside the penalty window cancels with the batch
        let events = booking
            .cancel_in_batch(
                CancellationClass::PenaltyCancel,
                Actor::Member(user_id),
                None,
                class_start() - Duration::minutes(5),
            )
            .unwrap();
        assert_eq!(
            events[0].transition().unwrap().classification,
            Some(CancellationClass::PenaltyCancel)
        );
    }

    #[test]
    fn test_provider_cancel_is_free_inside_window() {
        let (booking, _) = confirmed(class_start() - Duration::days(5));
        let events = booking
            .cancel_by_provider(
                Actor::Trainer(TrainerId::new()),
                Some("trainer sick".to_string()),
                class_start() - Duration::minutes(20),
            )
            .unwrap();

        let transition = events[0].transition().unwrap();
        assert_eq!(transition.classification, Some(CancellationClass::FreeCancel));
        assert_eq!(transition.reason.as_deref(), Some("trainer sick"));
    }

    #[test]
    fn test_attend_checks_time_then_distance() {
        let (booking, user_id) = confirmed(class_start() - Duration::days(1));
        let member = Actor::Member(user_id);

        let result = booking.attend(50.0, member.clone(), class_start() - Duration::minutes(20));
        assert!(matches!(result, Err(BookingError::CheckInTooEarly { .. })));

        let events = booking
            .attend(50.0, member.clone(), class_start() - Duration::minutes(10))
            .unwrap();
        assert_eq!(events[0].new_status(), BookingStatus::Attended);

        let result = booking.attend(200.0, member.clone(), class_start() - Duration::minutes(10));
        assert!(matches!(
            result,
            Err(BookingError::CheckInDistanceExceeded { .. })
        ));

        let result = booking.attend(f64::NAN, member, class_start());
        assert!(matches!(result, Err(BookingError::InvalidDistance { .. })));
    }

    #[test]
    fn test_attend_requires_confirmed() {
        let (pending, user_id) = booked(
            ReservationTier::ApprovalRequired,
            class_start() - Duration::days(1),
        );
        let result = pending.attend(10.0, Actor::Member(user_id), class_start());
        assert!(matches!(
            result,
            Err(BookingError::NotConfirmedStatus {
                current: BookingStatus::Pending
            })
        ));
    }

    #[test]
    fn test_no_show_from_confirmed_only() {
        let (mut booking, _) = confirmed(class_start() - Duration::days(1));
        let sweeper = Actor::system("attendance-sweep");
        let events = booking
            .mark_no_show(None, sweeper.clone(), class_start() + Duration::hours(2))
            .unwrap();
        booking.apply_events(events);

        assert_eq!(booking.status(), BookingStatus::NoShow);
        assert!(booking.is_terminal());
        assert!(matches!(
            booking.mark_no_show(None, sweeper, class_start() + Duration::hours(3)),
            Err(BookingError::NotConfirmedStatus { .. })
        ));
    }

    #[test]
    fn test_commands_on_missing_booking_fail() {
        let booking = Booking::default();
        let now = class_start();
        assert!(matches!(
            booking.confirm(Actor::system("t"), now),
            Err(BookingError::NotCreated)
        ));
        assert!(matches!(
            booking.cancel_by_provider(Actor::system("t"), None, now),
            Err(BookingError::NotCreated)
        ));
    }
}
