//! End-to-end tests for the coordinators: store, ports and both dispatch tiers.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Europe::Lisbon;
use common::{Actor, AggregateId, FixedClock, TemplateId, TimeRange, TrainerId, UserId};
use coordination::{
    AvailabilityError, Collaborators, CoordinationError, InMemoryMembershipValidator,
    InMemoryTicketLedger, InMemoryTrainerValidator, ReservationCoordinator, ReservePersonal,
    ReserveSeat, ScheduleCoordinator, StoredTimeOffValidator, TicketError, TicketRestoreHandler,
};
use domain::policy::{CancellationClass, ReservationTier};
use domain::{
    Aggregate, BookingError, BookingStatus, CreateRecurrenceGroup, DomainError, OpenSchedule,
    RecurrenceError, RecurrencePattern, RecurrenceStatus, RecurrenceType, ScheduleError,
    ScheduleStatus,
};
use event_store::InMemoryEventStore;
use projections::{BookingHistoryView, CalendarProjector, EventDispatcher, IdempotentHandler};

const TIER: ReservationTier = ReservationTier::AutoConfirm;

fn start() -> DateTime<Utc> {
    // Monday
    Utc.with_ymd_and_hms(2026, 10, 5, 8, 0, 0).unwrap()
}

fn class_window() -> TimeRange {
    TimeRange::starting_at(start() + Duration::days(3), Duration::hours(1)).unwrap()
}

struct Fixture {
    store: InMemoryEventStore,
    clock: FixedClock,
    tickets: Arc<InMemoryTicketLedger>,
    membership: Arc<InMemoryMembershipValidator>,
    trainers: Arc<InMemoryTrainerValidator>,
    history: BookingHistoryView,
    calendar: CalendarProjector,
    reservations: Arc<ReservationCoordinator<InMemoryEventStore>>,
    schedules: ScheduleCoordinator<InMemoryEventStore>,
}

impl Fixture {
    fn new() -> Self {
        let store = InMemoryEventStore::new();
        let clock = FixedClock::new(start());
        let tickets = Arc::new(InMemoryTicketLedger::new());
        let membership = Arc::new(InMemoryMembershipValidator::new());
        let trainers = Arc::new(InMemoryTrainerValidator::new());
        let history = BookingHistoryView::new();
        let calendar = CalendarProjector::new();

        let ports = Collaborators {
            tickets: tickets.clone(),
            membership: membership.clone(),
            trainers: trainers.clone(),
            availability: Arc::new(StoredTimeOffValidator::new(store.clone())),
            clock: Arc::new(clock.clone()),
        };
        let dispatcher = Arc::new(
            EventDispatcher::new(store.clone())
                .with_audit(Arc::new(history.clone()))
                .with_handler(Arc::new(IdempotentHandler::new(calendar.clone())))
                .with_handler(Arc::new(IdempotentHandler::new(TicketRestoreHandler::new(
                    tickets.clone(),
                )))),
        );

        Self {
            store: store.clone(),
            clock,
            tickets,
            membership,
            trainers,
            history,
            calendar,
            reservations: Arc::new(ReservationCoordinator::new(
                store.clone(),
                ports.clone(),
                dispatcher.clone(),
            )),
            schedules: ScheduleCoordinator::new(store, ports, dispatcher),
        }
    }

    fn trainer(&self) -> TrainerId {
        let trainer_id = TrainerId::new();
        self.trainers.register(trainer_id);
        trainer_id
    }

    /// A member with a year of membership and `tickets` tickets.
    fn member(&self, tickets: u32) -> UserId {
        let user_id = UserId::new();
        self.membership.activate(user_id, start() + Duration::days(365));
        self.tickets.grant(user_id, TIER, tickets);
        user_id
    }

    async fn open(&self, trainer_id: TrainerId, window: TimeRange, capacity: u32) -> AggregateId {
        let schedule_id = AggregateId::new();
        self.schedules
            .open_schedule(OpenSchedule {
                schedule_id,
                trainer_id,
                window,
                title: "Spin".to_string(),
                capacity,
                template_id: Some(TemplateId::new()),
                recurrence: None,
            })
            .await
            .unwrap();
        schedule_id
    }

    async fn program(
        &self,
        trainer_id: TrainerId,
        recurrence_type: RecurrenceType,
        capacity: u32,
    ) -> AggregateId {
        let group_id = AggregateId::new();
        self.schedules
            .create_group(program_cmd(group_id, trainer_id, recurrence_type, capacity))
            .await
            .unwrap();
        group_id
    }
}

/// Four Tuesday evenings in Lisbon, 13 Oct to 3 Nov.
fn program_cmd(
    group_id: AggregateId,
    trainer_id: TrainerId,
    recurrence_type: RecurrenceType,
    capacity: u32,
) -> CreateRecurrenceGroup {
    CreateRecurrenceGroup {
        group_id,
        trainer_id,
        template_id: TemplateId::new(),
        title: "Foundations".to_string(),
        pattern: RecurrencePattern {
            start_date: NaiveDate::from_ymd_opt(2026, 10, 13).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 11, 3).unwrap(),
            repeat_days: vec![Weekday::Tue],
            start_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            duration_minutes: 60,
            timezone: Lisbon,
        },
        recurrence_type,
        capacity,
    }
}

mod seats {
    use super::*;

    #[tokio::test]
    async fn test_reserve_seat_commits_booking_and_seat() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let schedule_id = fx.open(trainer_id, class_window(), 2).await;
        let user_id = fx.member(1);

        let req = ReserveSeat::new(schedule_id, user_id, TIER);
        let booking_id = req.booking_id;
        let booking = fx.reservations.reserve_seat(req).await.unwrap();

        assert_eq!(booking.status(), BookingStatus::Confirmed);
        assert_eq!(fx.tickets.balance(user_id, TIER), 0);

        let schedule = fx.schedules.schedule(schedule_id).await.unwrap();
        assert_eq!(schedule.capacity(), 1);
        assert_eq!(schedule.status(), ScheduleStatus::Open);
        assert!(schedule.holds(booking_id));
        assert_eq!(
            fx.history.current_status(booking_id).await,
            Some(BookingStatus::Confirmed)
        );
        let entries = fx.calendar.for_member(user_id).await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].visible);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_seat_race_admits_exactly_one() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let schedule_id = fx.open(trainer_id, class_window(), 1).await;
        let members: Vec<UserId> = (0..8).map(|_| fx.member(1)).collect();

        let mut handles = Vec::new();
        for user_id in members.iter().copied() {
            let reservations = fx.reservations.clone();
            handles.push(tokio::spawn(async move {
                reservations
                    .reserve_seat(ReserveSeat::new(schedule_id, user_id, TIER))
                    .await
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);

        let schedule = fx.schedules.schedule(schedule_id).await.unwrap();
        assert_eq!(schedule.capacity(), 0);
        assert_eq!(schedule.status(), ScheduleStatus::Closed);
        assert_eq!(schedule.holders().count(), 1);

        // Every loser ends with the ticket it started with
        let remaining: u32 = members.iter().map(|u| fx.tickets.balance(*u, TIER)).sum();
        assert_eq!(remaining, 7);
    }

    #[tokio::test]
    async fn test_failed_commit_restores_ticket() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let first = fx.open(trainer_id, class_window(), 5).await;
        let later = TimeRange::starting_at(class_window().end(), Duration::hours(1)).unwrap();
        let second = fx.open(trainer_id, later, 5).await;
        let user_id = fx.member(2);

        let booked = ReserveSeat::new(first, user_id, TIER);
        let booking_id = booked.booking_id;
        fx.reservations.reserve_seat(booked).await.unwrap();

        // Reusing the booking id makes the second unit lose on the booking stream
        let clash = ReserveSeat {
            booking_id,
            schedule_id: second,
            user_id,
            tier: TIER,
        };
        let err = fx.reservations.reserve_seat(clash).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(fx.tickets.balance(user_id, TIER), 1);
        assert_eq!(fx.tickets.restore_count(), 1);
        let untouched = fx.schedules.schedule(second).await.unwrap();
        assert_eq!(untouched.capacity(), 5);
    }

    #[tokio::test]
    async fn test_no_ticket_leaves_capacity() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let schedule_id = fx.open(trainer_id, class_window(), 3).await;
        let user_id = fx.member(0);

        let err = fx
            .reservations
            .reserve_seat(ReserveSeat::new(schedule_id, user_id, TIER))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoordinationError::Ticket(TicketError::Exhausted { .. })
        ));
        let schedule = fx.schedules.schedule(schedule_id).await.unwrap();
        assert_eq!(schedule.capacity(), 3);
    }

    #[tokio::test]
    async fn test_lapsed_membership_is_refused() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let schedule_id = fx.open(trainer_id, class_window(), 3).await;
        let user_id = fx.member(1);
        fx.membership.activate(user_id, class_window().start());

        let err = fx
            .reservations
            .reserve_seat(ReserveSeat::new(schedule_id, user_id, TIER))
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinationError::Membership(_)));
        assert_eq!(fx.tickets.balance(user_id, TIER), 1);
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn test_free_cancel_frees_seat_and_restores_ticket() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let schedule_id = fx.open(trainer_id, class_window(), 1).await;
        let user_id = fx.member(1);
        let req = ReserveSeat::new(schedule_id, user_id, TIER);
        let booking_id = req.booking_id;
        fx.reservations.reserve_seat(req).await.unwrap();

        fx.clock.advance(Duration::hours(2));
        let class = fx
            .reservations
            .cancel(booking_id, Actor::Member(user_id), None)
            .await
            .unwrap();

        assert_eq!(class, CancellationClass::FreeCancel);
        assert_eq!(fx.tickets.balance(user_id, TIER), 1);
        let schedule = fx.schedules.schedule(schedule_id).await.unwrap();
        assert_eq!(schedule.capacity(), 1);
        assert_eq!(schedule.status(), ScheduleStatus::Open);

        let entries = fx.calendar.for_member(user_id).await;
        assert!(!entries[0].visible);
    }

    #[tokio::test]
    async fn test_penalty_cancel_keeps_ticket() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let schedule_id = fx.open(trainer_id, class_window(), 4).await;
        let user_id = fx.member(1);
        let req = ReserveSeat::new(schedule_id, user_id, TIER);
        let booking_id = req.booking_id;
        fx.reservations.reserve_seat(req).await.unwrap();

        fx.clock.set(class_window().start() - Duration::hours(5));
        let class = fx
            .reservations
            .cancel(booking_id, Actor::Member(user_id), Some("sick".to_string()))
            .await
            .unwrap();

        assert_eq!(class, CancellationClass::PenaltyCancel);
        assert_eq!(fx.tickets.balance(user_id, TIER), 0);
        assert_eq!(fx.schedules.schedule(schedule_id).await.unwrap().capacity(), 4);
    }

    #[tokio::test]
    async fn test_cancel_inside_last_hour_is_refused() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let schedule_id = fx.open(trainer_id, class_window(), 4).await;
        let user_id = fx.member(1);
        let req = ReserveSeat::new(schedule_id, user_id, TIER);
        let booking_id = req.booking_id;
        fx.reservations.reserve_seat(req).await.unwrap();

        fx.clock.set(class_window().start() - Duration::minutes(30));
        let err = fx
            .reservations
            .cancel(booking_id, Actor::Member(user_id), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoordinationError::Domain(DomainError::Booking(BookingError::CancellationNotAllowed))
        ));
        assert_eq!(fx.schedules.schedule(schedule_id).await.unwrap().capacity(), 3);
    }

    #[tokio::test]
    async fn test_forced_schedule_cancel_cancels_holders() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let schedule_id = fx.open(trainer_id, class_window(), 3).await;
        let members = [fx.member(1), fx.member(1)];
        for user_id in members {
            fx.reservations
                .reserve_seat(ReserveSeat::new(schedule_id, user_id, TIER))
                .await
                .unwrap();
        }

        fx.clock.set(class_window().start() - Duration::hours(2));
        let err = fx
            .schedules
            .cancel_schedule(schedule_id, false, Actor::Trainer(trainer_id), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Domain(DomainError::Schedule(ScheduleError::DeadlineExceeded { .. }))
        ));

        let outcome = fx
            .schedules
            .cancel_schedule(
                schedule_id,
                true,
                Actor::Trainer(trainer_id),
                Some("trainer ill".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.bookings_cancelled, 2);
        assert_eq!(outcome.schedule.status(), ScheduleStatus::Cancelled);
        for user_id in members {
            assert_eq!(fx.tickets.balance(user_id, TIER), 1);
        }
    }
}

mod personal {
    use super::*;

    fn session(trainer_id: TrainerId, user_id: UserId) -> ReservePersonal {
        ReservePersonal::new(trainer_id, class_window(), "1:1 strength", user_id)
    }

    #[tokio::test]
    async fn test_personal_booking_awaits_approval() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let user_id = UserId::new();
        fx.membership.activate(user_id, start() + Duration::days(30));
        fx.tickets
            .grant(user_id, ReservationTier::ApprovalRequired, 1);

        let req = session(trainer_id, user_id);
        let (booking_id, schedule_id) = (req.booking_id, req.schedule_id);
        let booking = fx.reservations.reserve_personal(req).await.unwrap();
        assert_eq!(booking.status(), BookingStatus::Pending);

        let schedule = fx.schedules.schedule(schedule_id).await.unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Reserved);

        let confirmed = fx
            .reservations
            .confirm(booking_id, Actor::Trainer(trainer_id))
            .await
            .unwrap();
        assert_eq!(confirmed.status(), BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_rejection_restores_ticket_and_keeps_slot() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let user_id = UserId::new();
        fx.membership.activate(user_id, start() + Duration::days(30));
        fx.tickets
            .grant(user_id, ReservationTier::ApprovalRequired, 1);

        let req = session(trainer_id, user_id);
        let (booking_id, schedule_id) = (req.booking_id, req.schedule_id);
        fx.reservations.reserve_personal(req).await.unwrap();

        let rejected = fx
            .reservations
            .reject(booking_id, Actor::Trainer(trainer_id), Some("fully booked".to_string()))
            .await
            .unwrap();

        assert_eq!(rejected.status(), BookingStatus::Rejected);
        assert_eq!(fx.tickets.balance(user_id, ReservationTier::ApprovalRequired), 1);
        let schedule = fx.schedules.schedule(schedule_id).await.unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Reserved);
    }

    #[tokio::test]
    async fn test_trainer_cannot_take_two_sessions_at_once() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let (first, second) = (UserId::new(), UserId::new());
        for user_id in [first, second] {
            fx.membership.activate(user_id, start() + Duration::days(30));
            fx.tickets
                .grant(user_id, ReservationTier::ApprovalRequired, 1);
        }

        fx.reservations
            .reserve_personal(session(trainer_id, first))
            .await
            .unwrap();
        let req = session(trainer_id, second);
        let schedule_id = req.schedule_id;
        let err = fx.reservations.reserve_personal(req).await.unwrap_err();

        assert!(matches!(
            err,
            CoordinationError::Availability(AvailabilityError::ScheduleClash { .. })
        ));
        assert_eq!(fx.tickets.balance(second, ReservationTier::ApprovalRequired), 1);
        assert!(fx.schedules.schedule(schedule_id).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_trainer_is_refused() {
        let fx = Fixture::new();
        let user_id = fx.member(1);

        let err = fx
            .reservations
            .reserve_personal(session(TrainerId::new(), user_id))
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinationError::Trainer(_)));
    }
}

mod attendance {
    use super::*;

    #[tokio::test]
    async fn test_check_in_and_no_show() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let schedule_id = fx.open(trainer_id, class_window(), 4).await;
        let present = fx.member(1);
        let absent = fx.member(1);

        let req = ReserveSeat::new(schedule_id, present, TIER);
        let present_booking = req.booking_id;
        fx.reservations.reserve_seat(req).await.unwrap();
        let req = ReserveSeat::new(schedule_id, absent, TIER);
        let absent_booking = req.booking_id;
        fx.reservations.reserve_seat(req).await.unwrap();

        fx.clock.set(class_window().start() - Duration::minutes(20));
        let err = fx
            .reservations
            .check_in(present_booking, present, 10.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Domain(DomainError::Booking(BookingError::CheckInTooEarly { .. }))
        ));

        fx.clock.set(class_window().start() - Duration::minutes(5));
        let attended = fx
            .reservations
            .check_in(present_booking, present, 40.0)
            .await
            .unwrap();
        assert_eq!(attended.status(), BookingStatus::Attended);

        fx.clock.set(class_window().end() + Duration::minutes(10));
        let missed = fx
            .reservations
            .mark_no_show(absent_booking, None)
            .await
            .unwrap();
        assert_eq!(missed.status(), BookingStatus::NoShow);
        assert_eq!(
            fx.history.current_status(absent_booking).await,
            Some(BookingStatus::NoShow)
        );
    }
}

mod programs {
    use super::*;

    #[tokio::test]
    async fn test_enrollment_takes_one_pool_seat_and_mirrors() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Curriculum, 2).await;
        let first = fx.member(1);
        let second = fx.member(1);
        let third = fx.member(1);

        let enrollment = fx
            .reservations
            .enroll_program(group_id, first, TIER)
            .await
            .unwrap();
        assert_eq!(enrollment.bookings.len(), 4);
        assert_eq!(enrollment.remaining_capacity, 1);
        assert_eq!(enrollment.mirror.updated, 4);
        assert_eq!(fx.tickets.balance(first, TIER), 0);

        fx.reservations
            .enroll_program(group_id, second, TIER)
            .await
            .unwrap();
        let group = fx.schedules.group(group_id).await.unwrap();
        assert_eq!(group.status(), RecurrenceStatus::Closed);
        for child in group.children() {
            let schedule = fx.schedules.schedule(child.schedule_id).await.unwrap();
            assert_eq!(schedule.capacity(), 0);
            assert_eq!(schedule.status(), ScheduleStatus::Closed);
        }

        let err = fx
            .reservations
            .enroll_program(group_id, third, TIER)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Domain(DomainError::Recurrence(RecurrenceError::CapacityExceeded))
        ));
        assert_eq!(fx.tickets.balance(third, TIER), 1);
    }

    #[tokio::test]
    async fn test_curriculum_occurrence_rejects_direct_seats() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Curriculum, 2).await;
        let group = fx.schedules.group(group_id).await.unwrap();
        let user_id = fx.member(1);

        let err = fx
            .reservations
            .reserve_seat(ReserveSeat::new(group.children()[0].schedule_id, user_id, TIER))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoordinationError::Domain(DomainError::Schedule(
                ScheduleError::ReservationNotAllowedForCurriculum
            ))
        ));
    }

    #[tokio::test]
    async fn test_batch_cancel_releases_pool_and_bookings() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Curriculum, 2).await;
        let user_id = fx.member(1);
        let enrollment = fx
            .reservations
            .enroll_program(group_id, user_id, TIER)
            .await
            .unwrap();

        let single = &enrollment.bookings[0];
        let single_id = single.id().unwrap();
        assert_eq!(single.status(), BookingStatus::Confirmed);
        let err = fx
            .reservations
            .cancel(single_id, Actor::Member(user_id), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Domain(DomainError::Booking(BookingError::CurriculumRequiresBatch))
        ));

        fx.clock.advance(Duration::days(1));
        let outcome = fx
            .reservations
            .cancel_program(group_id, user_id, Actor::Member(user_id), None)
            .await
            .unwrap();

        assert_eq!(outcome.classification, CancellationClass::FreeCancel);
        assert_eq!(outcome.cancelled, 4);
        assert_eq!(outcome.remaining_capacity, 2);
        assert_eq!(fx.tickets.balance(user_id, TIER), 1);

        let group = fx.schedules.group(group_id).await.unwrap();
        assert!(group.enrollment(user_id).is_none());
        for child in group.children() {
            let schedule = fx.schedules.schedule(child.schedule_id).await.unwrap();
            assert_eq!(schedule.capacity(), 2);
        }
        assert_eq!(
            fx.history.current_status(single_id).await,
            Some(BookingStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_trainer_cancelling_one_occurrence_keeps_program_paid() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Curriculum, 2).await;
        let user_id = fx.member(1);
        let enrollment = fx
            .reservations
            .enroll_program(group_id, user_id, TIER)
            .await
            .unwrap();
        let group = fx.schedules.group(group_id).await.unwrap();

        let cancelled = fx
            .schedules
            .cancel_schedule(
                group.children()[0].schedule_id,
                true,
                Actor::Trainer(trainer_id),
                Some("sick".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(cancelled.bookings_cancelled, 1);

        let mut live = 0;
        for booking in &enrollment.bookings {
            let booking = fx.reservations.booking(booking.id().unwrap()).await.unwrap();
            if !booking.is_terminal() {
                live += 1;
            }
        }
        assert_eq!(live, 3);
        let group = fx.schedules.group(group_id).await.unwrap();
        assert!(group.enrollment(user_id).is_some());
        assert_eq!(fx.tickets.balance(user_id, TIER), 0);
        assert_eq!(fx.tickets.restore_count(), 0);

        // Leaving the program afterwards refunds the ticket exactly once
        fx.reservations
            .cancel_program(group_id, user_id, Actor::Member(user_id), None)
            .await
            .unwrap();
        assert_eq!(fx.tickets.balance(user_id, TIER), 1);
        assert_eq!(fx.tickets.restore_count(), 1);
    }

    #[tokio::test]
    async fn test_penalty_program_exit_keeps_ticket() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Curriculum, 2).await;
        let user_id = fx.member(1);
        fx.reservations
            .enroll_program(group_id, user_id, TIER)
            .await
            .unwrap();

        let group = fx.schedules.group(group_id).await.unwrap();
        let first_start = group.first_occurrence().unwrap().window.start();
        fx.clock.set(first_start - Duration::hours(12));

        let outcome = fx
            .reservations
            .cancel_program(group_id, user_id, Actor::Member(user_id), None)
            .await
            .unwrap();

        assert_eq!(outcome.classification, CancellationClass::PenaltyCancel);
        assert_eq!(fx.tickets.balance(user_id, TIER), 0);
        assert_eq!(fx.tickets.restore_count(), 0);
    }

    #[tokio::test]
    async fn test_program_cancel_refunds_each_enrollment_once() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Curriculum, 2).await;
        let first = fx.member(1);
        let second = fx.member(1);
        for user_id in [first, second] {
            fx.reservations
                .enroll_program(group_id, user_id, TIER)
                .await
                .unwrap();
        }

        let outcome = fx
            .schedules
            .cancel_group(group_id, Actor::Trainer(trainer_id), None)
            .await
            .unwrap();

        assert_eq!(outcome.bookings_cancelled, 8);
        assert_eq!(fx.tickets.balance(first, TIER), 1);
        assert_eq!(fx.tickets.balance(second, TIER), 1);
        assert_eq!(fx.tickets.restore_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_cancel_gate_closes_before_first_occurrence() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Curriculum, 2).await;
        let user_id = fx.member(1);
        fx.reservations
            .enroll_program(group_id, user_id, TIER)
            .await
            .unwrap();

        let group = fx.schedules.group(group_id).await.unwrap();
        let first_start = group.first_occurrence().unwrap().window.start();
        fx.clock.set(first_start - Duration::hours(2));

        let err = fx
            .reservations
            .cancel_program(group_id, user_id, Actor::Member(user_id), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Domain(DomainError::Booking(BookingError::CancellationNotAllowed))
        ));
        assert_eq!(fx.schedules.group(group_id).await.unwrap().remaining_capacity(), 1);
    }

    #[tokio::test]
    async fn test_another_member_cannot_cancel_enrollment() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Curriculum, 2).await;
        let user_id = fx.member(1);
        fx.reservations
            .enroll_program(group_id, user_id, TIER)
            .await
            .unwrap();

        let err = fx
            .reservations
            .cancel_program(group_id, user_id, Actor::Member(UserId::new()), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoordinationError::Domain(DomainError::Booking(BookingError::NotOwner))
        ));
    }

    #[tokio::test]
    async fn test_group_cancel_withdraws_children_and_bookings() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Routine, 3).await;
        let group = fx.schedules.group(group_id).await.unwrap();
        let user_id = fx.member(1);
        let req = ReserveSeat::new(group.children()[1].schedule_id, user_id, TIER);
        let booking_id = req.booking_id;
        let booking = fx.reservations.reserve_seat(req).await.unwrap();
        assert_eq!(booking.group_id(), Some(group_id));

        let outcome = fx
            .schedules
            .cancel_group(group_id, Actor::Trainer(trainer_id), Some("studio closed".to_string()))
            .await
            .unwrap();

        assert_eq!(outcome.group.status(), RecurrenceStatus::Cancelled);
        assert_eq!(outcome.children_cancelled, 4);
        assert_eq!(outcome.bookings_cancelled, 1);
        assert_eq!(outcome.children_failed, 0);
        assert_eq!(
            fx.reservations.booking(booking_id).await.unwrap().status(),
            BookingStatus::Cancelled
        );
        assert_eq!(fx.tickets.balance(user_id, TIER), 1);
        for child in outcome.group.children() {
            let schedule = fx.schedules.schedule(child.schedule_id).await.unwrap();
            assert_eq!(schedule.status(), ScheduleStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_group_cancel_skips_started_occurrences() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Curriculum, 2).await;
        let user_id = fx.member(1);
        fx.reservations
            .enroll_program(group_id, user_id, TIER)
            .await
            .unwrap();

        let group = fx.schedules.group(group_id).await.unwrap();
        fx.clock.set(group.children()[1].window.start() + Duration::minutes(10));

        let outcome = fx
            .schedules
            .cancel_group(group_id, Actor::Trainer(trainer_id), None)
            .await
            .unwrap();

        assert_eq!(outcome.children_cancelled, 2);
        assert_eq!(outcome.bookings_cancelled, 2);
        let first = fx
            .schedules
            .schedule(group.children()[0].schedule_id)
            .await
            .unwrap();
        assert_ne!(first.status(), ScheduleStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_group_finishes_after_last_occurrence() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Routine, 3).await;
        let group = fx.schedules.group(group_id).await.unwrap();

        let err = fx.schedules.finish_group(group_id).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Domain(DomainError::Recurrence(RecurrenceError::NotEnded { .. }))
        ));

        let last = group.children().last().unwrap().window;
        fx.clock.set(last.end() + Duration::hours(1));
        let finished = fx.schedules.finish_group(group_id).await.unwrap();

        assert_eq!(finished.status(), RecurrenceStatus::Finished);
        for child in finished.children() {
            let schedule = fx.schedules.schedule(child.schedule_id).await.unwrap();
            assert_eq!(schedule.status(), ScheduleStatus::Finished);
        }
    }
}

mod availability {
    use super::*;

    #[tokio::test]
    async fn test_time_off_blocks_new_slots_until_removed() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let blocked =
            TimeRange::starting_at(class_window().start() - Duration::hours(2), Duration::hours(4))
                .unwrap();
        let time_off = fx
            .schedules
            .register_time_off(trainer_id, blocked, Some("dentist".to_string()))
            .await
            .unwrap();

        let err = fx
            .schedules
            .open_schedule(OpenSchedule {
                schedule_id: AggregateId::new(),
                trainer_id,
                window: class_window(),
                title: "Spin".to_string(),
                capacity: 4,
                template_id: None,
                recurrence: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Availability(AvailabilityError::Conflict { .. })
        ));

        let time_off_id = time_off.id().unwrap();
        fx.schedules
            .remove_time_off(time_off_id, Actor::Trainer(trainer_id))
            .await
            .unwrap();
        fx.open(trainer_id, class_window(), 4).await;
    }

    #[tokio::test]
    async fn test_live_slot_blocks_overlap_until_cancelled() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let existing = fx.open(trainer_id, class_window(), 4).await;
        let half_past = TimeRange::starting_at(
            class_window().start() + Duration::minutes(30),
            Duration::hours(1),
        )
        .unwrap();

        let err = fx
            .schedules
            .open_schedule(OpenSchedule {
                schedule_id: AggregateId::new(),
                trainer_id,
                window: half_past,
                title: "Spin".to_string(),
                capacity: 4,
                template_id: None,
                recurrence: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Availability(AvailabilityError::ScheduleClash { schedule_id, .. })
                if schedule_id == existing
        ));

        // Another trainer may take the same window
        fx.open(fx.trainer(), half_past, 4).await;

        fx.schedules
            .cancel_schedule(existing, false, Actor::Trainer(trainer_id), None)
            .await
            .unwrap();
        fx.open(trainer_id, half_past, 4).await;
    }

    #[tokio::test]
    async fn test_program_over_live_slot_commits_nothing() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        // Straddles the end of the 20 Oct occurrence (19:00 Lisbon, 18:00 UTC)
        let slot = TimeRange::starting_at(
            Utc.with_ymd_and_hms(2026, 10, 20, 18, 30, 0).unwrap(),
            Duration::hours(1),
        )
        .unwrap();
        fx.open(trainer_id, slot, 4).await;

        let group_id = AggregateId::new();
        let err = fx
            .schedules
            .create_group(program_cmd(group_id, trainer_id, RecurrenceType::Curriculum, 3))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoordinationError::Availability(AvailabilityError::ScheduleClash { .. })
        ));
        assert!(matches!(
            fx.schedules.group(group_id).await.unwrap_err(),
            CoordinationError::Domain(DomainError::AggregateNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_program_over_time_off_commits_nothing() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        // Covers the 27 Oct occurrence
        let holiday = TimeRange::new(
            Utc.with_ymd_and_hms(2026, 10, 26, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 10, 29, 0, 0, 0).unwrap(),
        )
        .unwrap();
        fx.schedules
            .register_time_off(trainer_id, holiday, None)
            .await
            .unwrap();

        let group_id = AggregateId::new();
        let err = fx
            .schedules
            .create_group(program_cmd(group_id, trainer_id, RecurrenceType::Routine, 3))
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinationError::Availability(_)));
        assert!(matches!(
            fx.schedules.group(group_id).await.unwrap_err(),
            CoordinationError::Domain(DomainError::AggregateNotFound { .. })
        ));
    }
}

mod fanout {
    use super::*;
    use async_trait::async_trait;
    use coordination::fanout;
    use domain::{CommandHandler, RecurrenceGroup};
    use event_store::EventEnvelope;
    use projections::{AuditListener, ProjectionError};

    struct Unwritable;

    #[async_trait]
    impl AuditListener for Unwritable {
        fn name(&self) -> &'static str {
            "Unwritable"
        }

        async fn record(&self, _event: &EventEnvelope) -> projections::Result<()> {
            Err(ProjectionError::Projection("history table locked".to_string()))
        }
    }

    #[tokio::test]
    async fn test_mirror_audit_failure_counts_and_continues() {
        let fx = Fixture::new();
        let trainer_id = fx.trainer();
        let group_id = fx.program(trainer_id, RecurrenceType::Curriculum, 3).await;

        // Take a pool seat without touching the children.
        let groups: CommandHandler<InMemoryEventStore, RecurrenceGroup> =
            CommandHandler::new(fx.store.clone());
        let actor = Actor::system("test");
        let result = groups
            .execute(group_id, start(), |g| {
                g.reserve_from_pool(UserId::new(), Vec::new(), None, actor.clone(), start())
            })
            .await
            .unwrap();
        let group = result.aggregate;

        let failing = EventDispatcher::new(fx.store.clone()).with_audit(Arc::new(Unwritable));
        let report = fanout::mirror_children(&fx.store, &failing, &group, &actor, start())
            .await
            .unwrap();

        assert_eq!(report.updated, 0);
        assert_eq!(report.failed, group.children().len());
        // Every child was still written.
        for child in group.children() {
            let schedule = fx.schedules.schedule(child.schedule_id).await.unwrap();
            assert_eq!(schedule.capacity(), 2);
        }
    }
}
