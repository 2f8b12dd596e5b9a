//! Reservation coordinator: member-facing booking commands.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{Actor, AggregateId, TicketId, TimeRange, TrainerId, UserId};
use domain::booking::BookingError;
use domain::policy::{self, CancellationClass, ReservationTier};
use domain::recurrence::RecurrenceError;
use domain::{
    Booking, BookingEvent, BookingType, CommandHandler, Committed, DomainError, NewBooking,
    PersonalSlot, RecurrenceGroup, RecurrenceType, Schedule, ScheduleError, SlotContext,
    UnitOfWork,
};
use event_store::EventStore;
use projections::EventDispatcher;

use crate::Result;
use crate::error::CoordinationError;
use crate::fanout::{self, FanOutReport};
use crate::services::Collaborators;

/// A seat on an existing group slot.
#[derive(Debug, Clone)]
pub struct ReserveSeat {
    pub booking_id: AggregateId,
    pub schedule_id: AggregateId,
    pub user_id: UserId,
    pub tier: ReservationTier,
}

impl ReserveSeat {
    pub fn new(schedule_id: AggregateId, user_id: UserId, tier: ReservationTier) -> Self {
        Self {
            booking_id: AggregateId::new(),
            schedule_id,
            user_id,
            tier,
        }
    }
}

/// A 1:1 session; the slot is created together with the booking.
#[derive(Debug, Clone)]
pub struct ReservePersonal {
    pub booking_id: AggregateId,
    pub schedule_id: AggregateId,
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub title: String,
    pub user_id: UserId,
    pub tier: ReservationTier,
}

impl ReservePersonal {
    pub fn new(
        trainer_id: TrainerId,
        window: TimeRange,
        title: impl Into<String>,
        user_id: UserId,
    ) -> Self {
        Self {
            booking_id: AggregateId::new(),
            schedule_id: AggregateId::new(),
            trainer_id,
            window,
            title: title.into(),
            user_id,
            tier: BookingType::Personal.default_tier(),
        }
    }
}

/// Result of enrolling in a curriculum program.
#[derive(Debug)]
pub struct Enrollment {
    /// One booking per occurrence, in occurrence order.
    pub bookings: Vec<Booking>,
    pub ticket_id: TicketId,
    pub remaining_capacity: u32,
    pub mirror: FanOutReport,
}

/// Result of leaving a curriculum program.
#[derive(Debug)]
pub struct ProgramCancellation {
    pub classification: CancellationClass,
    pub cancelled: usize,
    pub remaining_capacity: u32,
    pub mirror: FanOutReport,
}

/// Runs booking commands that touch a booking and its slot or pool.
///
/// Every command commits the booking and exactly one capacity holder in one
/// unit. Tickets are consumed before the commit and given back if the
/// commit does not happen; all other ticket restores run downstream from
/// the integration events.
pub struct ReservationCoordinator<S: EventStore> {
    store: S,
    bookings: CommandHandler<S, Booking>,
    schedules: CommandHandler<S, Schedule>,
    groups: CommandHandler<S, RecurrenceGroup>,
    ports: Collaborators,
    dispatcher: Arc<EventDispatcher<S>>,
}

impl<S: EventStore + Clone> ReservationCoordinator<S> {
    pub fn new(store: S, ports: Collaborators, dispatcher: Arc<EventDispatcher<S>>) -> Self {
        Self {
            bookings: CommandHandler::new(store.clone()),
            schedules: CommandHandler::new(store.clone()),
            groups: CommandHandler::new(store.clone()),
            store,
            ports,
            dispatcher,
        }
    }

    /// Loads a booking by id.
    pub async fn booking(&self, booking_id: AggregateId) -> Result<Booking> {
        Ok(self.bookings.load_required(booking_id).await?)
    }

    /// Books one seat on a standalone or routine group slot.
    #[tracing::instrument(skip(self), fields(schedule_id = %req.schedule_id, user_id = %req.user_id))]
    pub async fn reserve_seat(&self, req: ReserveSeat) -> Result<Booking> {
        let now = self.ports.clock.now();
        let actor = Actor::Member(req.user_id);

        let mut schedule = self.schedules.load_required(req.schedule_id).await?;
        let slot = schedule
            .slot_context()
            .ok_or(DomainError::from(ScheduleError::NotCreated))?;
        self.ports
            .membership
            .validate_active_until(req.user_id, slot.window.end())
            .await?;

        let seat = schedule
            .reserve_seat(req.booking_id, req.tier.deadline(), actor.clone(), now)
            .map_err(DomainError::from)?;
        let ticket_id = self.ports.tickets.consume_one(req.user_id, req.tier).await?;

        let mut booking = Booking::default();
        let outcome: std::result::Result<Committed, DomainError> = async {
            let created = booking
                .create(
                    NewBooking {
                        booking_id: req.booking_id,
                        schedule_id: req.schedule_id,
                        user_id: req.user_id,
                        booking_type: BookingType::GroupRoutine,
                        tier: req.tier,
                        ticket_id: Some(ticket_id),
                        slot,
                        group_id: schedule.recurrence().map(|link| link.group_id),
                    },
                    actor.clone(),
                    now,
                )
                .map_err(DomainError::from)?;

            let mut unit = UnitOfWork::new(now);
            unit.record(req.booking_id, &mut booking, created)?;
            unit.record(req.schedule_id, &mut schedule, seat)?;
            unit.commit(&self.store).await
        }
        .await;

        let committed = self.settle_ticket(outcome, ticket_id, &actor).await?;
        metrics::counter!("bookings_created_total", "booking_type" => BookingType::GroupRoutine.as_str())
            .increment(1);
        tracing::info!(booking_id = %req.booking_id, status = %booking.status(), "seat reserved");

        self.dispatcher.dispatch(&committed).await?;
        Ok(booking)
    }

    /// Books a 1:1 session, creating its RESERVED slot in the same unit.
    #[tracing::instrument(skip(self), fields(trainer_id = %req.trainer_id, user_id = %req.user_id))]
    pub async fn reserve_personal(&self, req: ReservePersonal) -> Result<Booking> {
        let now = self.ports.clock.now();
        let actor = Actor::Member(req.user_id);

        self.ports.trainers.validate_trainer(req.trainer_id).await?;
        self.ports
            .availability
            .validate_no_overlap(req.trainer_id, req.window.start(), req.window.end())
            .await?;
        self.ports
            .membership
            .validate_active_until(req.user_id, req.window.end())
            .await?;

        let mut schedule = Schedule::default();
        let reserved = schedule
            .reserve_personal(
                PersonalSlot {
                    schedule_id: req.schedule_id,
                    trainer_id: req.trainer_id,
                    window: req.window,
                    title: req.title.clone(),
                },
                req.booking_id,
                actor.clone(),
                now,
            )
            .map_err(DomainError::from)?;
        let ticket_id = self.ports.tickets.consume_one(req.user_id, req.tier).await?;

        let mut booking = Booking::default();
        let outcome: std::result::Result<Committed, DomainError> = async {
            let created = booking
                .create(
                    NewBooking {
                        booking_id: req.booking_id,
                        schedule_id: req.schedule_id,
                        user_id: req.user_id,
                        booking_type: BookingType::Personal,
                        tier: req.tier,
                        ticket_id: Some(ticket_id),
                        slot: SlotContext {
                            trainer_id: req.trainer_id,
                            window: req.window,
                            title: req.title.clone(),
                        },
                        group_id: None,
                    },
                    actor.clone(),
                    now,
                )
                .map_err(DomainError::from)?;

            let mut unit = UnitOfWork::new(now);
            unit.record(req.booking_id, &mut booking, created)?;
            unit.record(req.schedule_id, &mut schedule, reserved)?;
            unit.commit(&self.store).await
        }
        .await;

        let committed = self.settle_ticket(outcome, ticket_id, &actor).await?;
        metrics::counter!("bookings_created_total", "booking_type" => BookingType::Personal.as_str())
            .increment(1);

        self.dispatcher.dispatch(&committed).await?;
        Ok(booking)
    }

    /// Enrolls a member in every occurrence of a curriculum program.
    ///
    /// One ticket and one pool seat cover the whole program; the pool keeps
    /// the ticket so it can be refunded when the enrollment ends. Occurrences
    /// are mirrored after the pool commits.
    #[tracing::instrument(skip(self))]
    pub async fn enroll_program(
        &self,
        group_id: AggregateId,
        user_id: UserId,
        tier: ReservationTier,
    ) -> Result<Enrollment> {
        let now = self.ports.clock.now();
        let actor = Actor::Member(user_id);

        let mut group = self.groups.load_required(group_id).await?;
        if group.recurrence_type() != RecurrenceType::Curriculum {
            return Err(DomainError::from(RecurrenceError::NotCurriculum).into());
        }
        let children = group.children().to_vec();
        let trainer_id = group
            .trainer_id()
            .ok_or(DomainError::from(RecurrenceError::NotCreated))?;
        let last = children
            .last()
            .ok_or(DomainError::from(RecurrenceError::NoOccurrences))?;
        self.ports
            .membership
            .validate_active_until(user_id, last.window.end())
            .await?;

        let booking_ids: Vec<AggregateId> = children.iter().map(|_| AggregateId::new()).collect();
        let ticket_id = self.ports.tickets.consume_one(user_id, tier).await?;

        let title = group.title().to_string();
        let mut bookings = Vec::with_capacity(children.len());
        let outcome: std::result::Result<Committed, DomainError> = async {
            let pooled = group.reserve_from_pool(
                user_id,
                booking_ids.clone(),
                Some(ticket_id),
                actor.clone(),
                now,
            )?;
            let mut unit = UnitOfWork::new(now);
            unit.record(group_id, &mut group, pooled)?;

            for (child, booking_id) in children.iter().zip(&booking_ids) {
                let mut booking = Booking::default();
                let created = booking
                    .create(
                        NewBooking {
                            booking_id: *booking_id,
                            schedule_id: child.schedule_id,
                            user_id,
                            booking_type: BookingType::GroupCurriculum,
                            tier,
                            ticket_id: Some(ticket_id),
                            slot: SlotContext {
                                trainer_id,
                                window: child.window,
                                title: title.clone(),
                            },
                            group_id: Some(group_id),
                        },
                        actor.clone(),
                        now,
                    )
                    .map_err(DomainError::from)?;
                unit.record(*booking_id, &mut booking, created)?;
                bookings.push(booking);
            }

            unit.commit(&self.store).await
        }
        .await;

        let committed = self.settle_ticket(outcome, ticket_id, &actor).await?;
        metrics::counter!("bookings_created_total", "booking_type" => BookingType::GroupCurriculum.as_str())
            .increment(bookings.len() as u64);
        tracing::info!(
            %group_id,
            occurrences = bookings.len(),
            remaining = group.remaining_capacity(),
            "program enrollment committed"
        );

        self.dispatcher.dispatch(&committed).await?;
        let mirror = fanout::mirror_children(&self.store, &self.dispatcher, &group, &actor, now).await?;

        Ok(Enrollment {
            bookings,
            ticket_id,
            remaining_capacity: group.remaining_capacity(),
            mirror,
        })
    }

    /// Approves a pending booking.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, booking_id: AggregateId, actor: Actor) -> Result<Booking> {
        let now = self.ports.clock.now();
        let result = self
            .bookings
            .execute(booking_id, now, |b| b.confirm(actor.clone(), now))
            .await?;

        self.dispatcher.dispatch(&result.committed).await?;
        Ok(result.aggregate)
    }

    /// Declines a pending booking and frees its seat.
    #[tracing::instrument(skip(self))]
    pub async fn reject(
        &self,
        booking_id: AggregateId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Booking> {
        let now = self.ports.clock.now();
        let mut booking = self.bookings.load_required(booking_id).await?;
        let rejected = booking
            .reject(reason, actor.clone(), now)
            .map_err(DomainError::from)?;

        let mut unit = UnitOfWork::new(now);
        unit.record(booking_id, &mut booking, rejected)?;
        self.release_seat(booking_id, &booking, &actor, now, &mut unit)
            .await?;

        let committed = self.commit(unit).await?;
        self.dispatcher.dispatch(&committed).await?;
        Ok(booking)
    }

    /// Cancels a single booking under the cancellation policy and frees its
    /// seat in the same unit.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        booking_id: AggregateId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<CancellationClass> {
        let now = self.ports.clock.now();
        let mut booking = self.bookings.load_required(booking_id).await?;
        let cancelled = booking
            .cancel(actor.clone(), reason, now)
            .map_err(DomainError::from)?;
        let classification = classification_of(&cancelled);

        let mut unit = UnitOfWork::new(now);
        unit.record(booking_id, &mut booking, cancelled)?;
        self.release_seat(booking_id, &booking, &actor, now, &mut unit)
            .await?;

        let committed = self.commit(unit).await?;
        metrics::counter!("bookings_cancelled_total", "classification" => classification.as_str())
            .increment(1);
        tracing::info!(%booking_id, classification = classification.as_str(), "booking cancelled");

        self.dispatcher.dispatch(&committed).await?;
        Ok(classification)
    }

    /// Cancels a member's whole curriculum enrollment as one batch.
    ///
    /// The gate and classification are taken from the first occurrence; the
    /// pool seat comes back in the same unit and occurrences are mirrored
    /// afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_program(
        &self,
        group_id: AggregateId,
        user_id: UserId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<ProgramCancellation> {
        let now = self.ports.clock.now();
        if let Actor::Member(member) = &actor
            && *member != user_id
        {
            return Err(DomainError::from(BookingError::NotOwner).into());
        }

        let mut group = self.groups.load_required(group_id).await?;
        let booking_ids = group
            .enrollment(user_id)
            .ok_or(DomainError::from(RecurrenceError::NotEnrolled { user_id }))?
            .to_vec();
        let first_start = group
            .first_occurrence()
            .map(|child| child.window.start())
            .ok_or(DomainError::from(RecurrenceError::NoOccurrences))?;

        let mut bookings = Vec::with_capacity(booking_ids.len());
        for booking_id in booking_ids {
            bookings.push((booking_id, self.bookings.load_required(booking_id).await?));
        }
        let booked_at = bookings
            .iter()
            .filter_map(|(_, b)| b.created_at())
            .min()
            .unwrap_or(now);
        let classification = policy::classify_batch(booked_at, now, first_start)
            .ok_or(DomainError::from(BookingError::CancellationNotAllowed))?;

        let released = group
            .release_to_pool(user_id, classification, actor.clone(), reason.clone(), now)
            .map_err(DomainError::from)?;
        let mut unit = UnitOfWork::new(now);
        unit.record(group_id, &mut group, released)?;

        let mut cancelled = 0;
        for (booking_id, booking) in bookings.iter_mut() {
            if booking.is_terminal() {
                continue;
            }
            let events = booking
                .cancel_in_batch(classification, actor.clone(), reason.clone(), now)
                .map_err(DomainError::from)?;
            unit.record(*booking_id, booking, events)?;
            cancelled += 1;
        }

        let committed = self.commit(unit).await?;
        metrics::counter!("bookings_cancelled_total", "classification" => classification.as_str())
            .increment(cancelled as u64);
        tracing::info!(%group_id, cancelled, "program enrollment cancelled");

        self.dispatcher.dispatch(&committed).await?;
        let mirror = fanout::mirror_children(&self.store, &self.dispatcher, &group, &actor, now).await?;

        Ok(ProgramCancellation {
            classification,
            cancelled,
            remaining_capacity: group.remaining_capacity(),
            mirror,
        })
    }

    /// Checks a member in.
    #[tracing::instrument(skip(self))]
    pub async fn check_in(
        &self,
        booking_id: AggregateId,
        user_id: UserId,
        distance_metres: f64,
    ) -> Result<Booking> {
        let now = self.ports.clock.now();
        let result = self
            .bookings
            .execute(booking_id, now, |b| {
                b.attend(distance_metres, Actor::Member(user_id), now)
            })
            .await?;

        self.dispatcher.dispatch(&result.committed).await?;
        Ok(result.aggregate)
    }

    /// Marks a confirmed booking as a no-show. Time-triggered.
    #[tracing::instrument(skip(self))]
    pub async fn mark_no_show(
        &self,
        booking_id: AggregateId,
        reason: Option<String>,
    ) -> Result<Booking> {
        let now = self.ports.clock.now();
        let result = self
            .bookings
            .execute(booking_id, now, |b| {
                b.mark_no_show(reason, Actor::system("no-show-sweeper"), now)
            })
            .await?;

        self.dispatcher.dispatch(&result.committed).await?;
        Ok(result.aggregate)
    }

    /// Records the seat release for a booking that stops holding capacity.
    ///
    /// Curriculum seats belong to the pool and are only released as a batch.
    async fn release_seat(
        &self,
        booking_id: AggregateId,
        booking: &Booking,
        actor: &Actor,
        now: DateTime<Utc>,
        unit: &mut UnitOfWork,
    ) -> Result<()> {
        if booking.booking_type() == BookingType::GroupCurriculum {
            return Ok(());
        }
        let Some(schedule_id) = booking.schedule_id() else {
            return Ok(());
        };

        let mut schedule = self.schedules.load_required(schedule_id).await?;
        let released = schedule
            .release_seat(booking_id, actor.clone(), now)
            .map_err(DomainError::from)?;
        unit.record(schedule_id, &mut schedule, released)?;
        Ok(())
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<Committed> {
        unit.commit(&self.store).await.map_err(|err| {
            if err.is_retryable() {
                metrics::counter!("seat_conflicts_total").increment(1);
            }
            CoordinationError::from(err)
        })
    }

    /// Gives the ticket back when the unit it paid for did not commit.
    async fn settle_ticket(
        &self,
        outcome: std::result::Result<Committed, DomainError>,
        ticket_id: TicketId,
        actor: &Actor,
    ) -> Result<Committed> {
        let err = match outcome {
            Ok(committed) => return Ok(committed),
            Err(err) => err,
        };

        if err.is_retryable() {
            metrics::counter!("seat_conflicts_total").increment(1);
        }
        if let Err(restore_err) = self.ports.tickets.restore(ticket_id, actor).await {
            tracing::error!(%ticket_id, error = %restore_err, "ticket restore after failed commit failed");
        } else {
            tracing::info!(%ticket_id, error = %err, "ticket restored after failed commit");
        }
        Err(err.into())
    }
}

fn classification_of(events: &[BookingEvent]) -> CancellationClass {
    events
        .iter()
        .find_map(|e| e.transition().and_then(|t| t.classification))
        .unwrap_or(CancellationClass::FreeCancel)
}
