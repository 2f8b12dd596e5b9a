//! Schedule coordinator: trainer-facing slot, program and time-off commands.

use std::sync::Arc;

use chrono::Duration;
use common::{Actor, AggregateId, TimeRange, TrainerId};
use domain::policy::{CancellationClass, SCHEDULE_CANCEL_DEADLINE_HOURS};
use domain::{
    CommandHandler, CreateRecurrenceGroup, DomainError, OpenSchedule, RecurrenceGroup,
    RecurrenceLink, RegisterTimeOff, Schedule, TimeOff, UnitOfWork,
};
use event_store::EventStore;
use projections::EventDispatcher;

use crate::Result;
use crate::fanout::{self, FanOutReport};
use crate::services::Collaborators;

/// Result of withdrawing a slot.
#[derive(Debug)]
pub struct ScheduleCancellation {
    pub schedule: Schedule,
    /// Bookings cancelled by the provider alongside the slot.
    pub bookings_cancelled: usize,
}

/// Result of withdrawing a whole program.
#[derive(Debug)]
pub struct GroupCancellation {
    pub group: RecurrenceGroup,
    pub children_cancelled: usize,
    pub bookings_cancelled: usize,
    pub children_failed: usize,
}

/// Runs trainer-side commands on slots, programs and time-off blocks.
pub struct ScheduleCoordinator<S: EventStore> {
    store: S,
    schedules: CommandHandler<S, Schedule>,
    groups: CommandHandler<S, RecurrenceGroup>,
    time_offs: CommandHandler<S, TimeOff>,
    ports: Collaborators,
    dispatcher: Arc<EventDispatcher<S>>,
}

impl<S: EventStore + Clone> ScheduleCoordinator<S> {
    pub fn new(store: S, ports: Collaborators, dispatcher: Arc<EventDispatcher<S>>) -> Self {
        Self {
            schedules: CommandHandler::new(store.clone()),
            groups: CommandHandler::new(store.clone()),
            time_offs: CommandHandler::new(store.clone()),
            store,
            ports,
            dispatcher,
        }
    }

    pub async fn schedule(&self, schedule_id: AggregateId) -> Result<Schedule> {
        Ok(self.schedules.load_required(schedule_id).await?)
    }

    pub async fn group(&self, group_id: AggregateId) -> Result<RecurrenceGroup> {
        Ok(self.groups.load_required(group_id).await?)
    }

    /// Opens a standalone group slot.
    #[tracing::instrument(skip(self, cmd), fields(schedule_id = %cmd.schedule_id, trainer_id = %cmd.trainer_id))]
    pub async fn open_schedule(&self, cmd: OpenSchedule) -> Result<Schedule> {
        let now = self.ports.clock.now();
        let actor = Actor::Trainer(cmd.trainer_id);
        self.ports.trainers.validate_trainer(cmd.trainer_id).await?;
        self.ports
            .availability
            .validate_no_overlap(cmd.trainer_id, cmd.window.start(), cmd.window.end())
            .await?;

        let schedule_id = cmd.schedule_id;
        let result = self
            .schedules
            .execute(schedule_id, now, |s| s.open(cmd, actor, now))
            .await?;

        self.dispatcher.dispatch(&result.committed).await?;
        Ok(result.aggregate)
    }

    /// Withdraws a slot and cancels every live booking on it.
    ///
    /// Inside the cancellation deadline the call must be forced.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_schedule(
        &self,
        schedule_id: AggregateId,
        force: bool,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<ScheduleCancellation> {
        let now = self.ports.clock.now();
        let mut schedule = self.schedules.load_required(schedule_id).await?;
        let cancelled = schedule
            .cancel(
                force,
                Duration::hours(SCHEDULE_CANCEL_DEADLINE_HOURS),
                actor.clone(),
                reason.clone(),
                now,
            )
            .map_err(DomainError::from)?;

        let group = match schedule.recurrence() {
            Some(link) => Some(self.groups.load_required(link.group_id).await?),
            None => None,
        };
        let mut attached = fanout::bookings_on(&self.store, &schedule, group.as_ref()).await?;

        let mut unit = UnitOfWork::new(now);
        unit.record(schedule_id, &mut schedule, cancelled)?;
        for (booking_id, booking) in attached.iter_mut() {
            let events = booking
                .cancel_by_provider(actor.clone(), reason.clone(), now)
                .map_err(DomainError::from)?;
            unit.record(*booking_id, booking, events)?;
        }

        let committed = unit.commit(&self.store).await?;
        metrics::counter!("bookings_cancelled_total", "classification" => CancellationClass::FreeCancel.as_str())
            .increment(attached.len() as u64);
        tracing::info!(%schedule_id, bookings = attached.len(), "schedule cancelled");

        self.dispatcher.dispatch(&committed).await?;
        Ok(ScheduleCancellation {
            schedule,
            bookings_cancelled: attached.len(),
        })
    }

    /// Stops new reservations on a slot.
    #[tracing::instrument(skip(self))]
    pub async fn close_schedule(
        &self,
        schedule_id: AggregateId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Schedule> {
        let now = self.ports.clock.now();
        let result = self
            .schedules
            .execute(schedule_id, now, |s| s.close(actor, reason, now))
            .await?;

        self.dispatcher.dispatch(&result.committed).await?;
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    pub async fn reopen_schedule(&self, schedule_id: AggregateId, actor: Actor) -> Result<Schedule> {
        let now = self.ports.clock.now();
        let result = self
            .schedules
            .execute(schedule_id, now, |s| s.reopen(actor, now))
            .await?;

        self.dispatcher.dispatch(&result.committed).await?;
        Ok(result.aggregate)
    }

    /// Retires a slot whose window is over.
    #[tracing::instrument(skip(self))]
    pub async fn finish_schedule(&self, schedule_id: AggregateId) -> Result<Schedule> {
        let now = self.ports.clock.now();
        let result = self
            .schedules
            .execute(schedule_id, now, |s| {
                s.finish(Actor::system("schedule-finisher"), now)
            })
            .await?;

        self.dispatcher.dispatch(&result.committed).await?;
        Ok(result.aggregate)
    }

    /// Creates a recurring program and opens one slot per occurrence, all in
    /// one unit.
    ///
    /// Every occurrence is checked against the trainer's time off first; one
    /// blocked occurrence fails the whole program.
    #[tracing::instrument(skip(self, cmd), fields(group_id = %cmd.group_id, trainer_id = %cmd.trainer_id))]
    pub async fn create_group(&self, cmd: CreateRecurrenceGroup) -> Result<RecurrenceGroup> {
        let now = self.ports.clock.now();
        let actor = Actor::Trainer(cmd.trainer_id);
        let group_id = cmd.group_id;
        let trainer_id = cmd.trainer_id;
        self.ports.trainers.validate_trainer(trainer_id).await?;

        let mut group = RecurrenceGroup::default();
        let created = group
            .create(cmd, actor.clone(), now)
            .map_err(DomainError::from)?;

        let mut unit = UnitOfWork::new(now);
        unit.record(group_id, &mut group, created)?;

        for child in group.children() {
            self.ports
                .availability
                .validate_no_overlap(trainer_id, child.window.start(), child.window.end())
                .await?;
        }

        let link = RecurrenceLink {
            group_id,
            recurrence_type: group.recurrence_type(),
        };
        for child in group.children() {
            let mut schedule = Schedule::default();
            let opened = schedule
                .open(
                    OpenSchedule {
                        schedule_id: child.schedule_id,
                        trainer_id,
                        window: child.window,
                        title: group.title().to_string(),
                        capacity: group.template_capacity(),
                        template_id: group.template_id(),
                        recurrence: Some(link),
                    },
                    actor.clone(),
                    now,
                )
                .map_err(DomainError::from)?;
            unit.record(child.schedule_id, &mut schedule, opened)?;
        }

        let committed = unit.commit(&self.store).await?;
        tracing::info!(
            %group_id,
            occurrences = group.children().len(),
            recurrence_type = group.recurrence_type().as_str(),
            "recurrence group created"
        );

        self.dispatcher.dispatch(&committed).await?;
        Ok(group)
    }

    /// Withdraws a program, then each occurrence that has not started.
    ///
    /// The pool commits first; occurrences are withdrawn one unit each, so a
    /// failure on one child is logged and counted without undoing the rest.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_group(
        &self,
        group_id: AggregateId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<GroupCancellation> {
        let now = self.ports.clock.now();
        let result = self
            .groups
            .execute(group_id, now, |g| g.cancel_all(actor.clone(), reason.clone(), now))
            .await?;
        self.dispatcher.dispatch(&result.committed).await?;
        let group = result.aggregate;

        let mut outcome = GroupCancellation {
            group: group.clone(),
            children_cancelled: 0,
            bookings_cancelled: 0,
            children_failed: 0,
        };
        for child in group.children() {
            if child.window.has_started(now) {
                continue;
            }
            let schedule = self.schedules.load_required(child.schedule_id).await?;
            if schedule.status().is_terminal() {
                continue;
            }

            match fanout::withdraw_child(
                &self.store,
                &self.dispatcher,
                child.schedule_id,
                &group,
                &actor,
                reason.clone(),
                now,
            )
            .await
            {
                Ok(bookings) => {
                    outcome.children_cancelled += 1;
                    outcome.bookings_cancelled += bookings;
                }
                Err(err) => {
                    tracing::warn!(schedule_id = %child.schedule_id, error = %err, "occurrence withdrawal failed");
                    outcome.children_failed += 1;
                }
            }
        }

        metrics::counter!("bookings_cancelled_total", "classification" => CancellationClass::FreeCancel.as_str())
            .increment(outcome.bookings_cancelled as u64);
        tracing::info!(
            %group_id,
            children = outcome.children_cancelled,
            bookings = outcome.bookings_cancelled,
            failed = outcome.children_failed,
            "recurrence group cancelled"
        );
        Ok(outcome)
    }

    /// Retires a program and every occurrence still open.
    #[tracing::instrument(skip(self))]
    pub async fn finish_group(&self, group_id: AggregateId) -> Result<RecurrenceGroup> {
        let now = self.ports.clock.now();
        let actor = Actor::system("schedule-finisher");
        let result = self
            .groups
            .execute(group_id, now, |g| g.finish(actor.clone(), now))
            .await?;
        self.dispatcher.dispatch(&result.committed).await?;

        for child in result.aggregate.children() {
            let finished = self
                .schedules
                .execute(child.schedule_id, now, |s| {
                    if s.status().is_terminal() {
                        Ok(vec![])
                    } else {
                        s.finish(actor.clone(), now)
                    }
                })
                .await?;
            self.dispatcher.dispatch(&finished.committed).await?;
        }
        Ok(result.aggregate)
    }

    /// Re-copies the pool state onto every occurrence.
    pub async fn mirror_group(&self, group_id: AggregateId) -> Result<FanOutReport> {
        let now = self.ports.clock.now();
        let group = self.groups.load_required(group_id).await?;
        fanout::mirror_children(
            &self.store,
            &self.dispatcher,
            &group,
            &Actor::system("pool-mirror"),
            now,
        )
        .await
    }

    /// Blocks a window on a trainer's calendar.
    #[tracing::instrument(skip(self))]
    pub async fn register_time_off(
        &self,
        trainer_id: TrainerId,
        window: TimeRange,
        reason: Option<String>,
    ) -> Result<TimeOff> {
        let now = self.ports.clock.now();
        self.ports.trainers.validate_trainer(trainer_id).await?;

        let time_off_id = AggregateId::new();
        let result = self
            .time_offs
            .execute(time_off_id, now, |t| {
                t.register(
                    RegisterTimeOff {
                        time_off_id,
                        trainer_id,
                        window,
                        reason,
                    },
                    Actor::Trainer(trainer_id),
                    now,
                )
            })
            .await?;

        self.dispatcher.dispatch(&result.committed).await?;
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_time_off(&self, time_off_id: AggregateId, actor: Actor) -> Result<TimeOff> {
        let now = self.ports.clock.now();
        let result = self
            .time_offs
            .execute(time_off_id, now, |t| t.remove(actor, now))
            .await?;

        self.dispatcher.dispatch(&result.committed).await?;
        Ok(result.aggregate)
    }
}
