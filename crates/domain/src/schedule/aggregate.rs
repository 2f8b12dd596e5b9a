//! Schedule aggregate implementation.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use common::{Actor, AggregateId, TemplateId, TimeRange, TrainerId};
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::booking::SlotContext;
use crate::recurrence::{RecurrenceStatus, RecurrenceType};

use super::{
    RecurrenceLink, ScheduleError, ScheduleEvent, ScheduleStatus,
    events::{PersonalSlotReservedData, ScheduleChangeData, ScheduleOpenedData},
};

/// Everything needed to publish a group slot.
#[derive(Debug, Clone)]
pub struct OpenSchedule {
    pub schedule_id: AggregateId,
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub title: String,
    pub capacity: u32,
    pub template_id: Option<TemplateId>,
    pub recurrence: Option<RecurrenceLink>,
}

/// Everything needed to create a 1:1 slot.
#[derive(Debug, Clone)]
pub struct PersonalSlot {
    pub schedule_id: AggregateId,
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub title: String,
}

/// Schedule aggregate root.
///
/// Owns the seat count of one occurrence. `capacity` is the number of free
/// seats; `max_capacity` is the total the slot was published with.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    id: Option<AggregateId>,
    version: Version,
    trainer_id: Option<TrainerId>,
    window: Option<TimeRange>,
    title: String,
    status: ScheduleStatus,
    capacity: u32,
    max_capacity: u32,
    holders: BTreeSet<AggregateId>,
    manually_closed: bool,
    recurrence: Option<RecurrenceLink>,
    template_id: Option<TemplateId>,
}

impl Aggregate for Schedule {
    type Event = ScheduleEvent;
    type Error = ScheduleError;

    fn aggregate_type() -> &'static str {
        "Schedule"
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
            ScheduleEvent::ScheduleOpened(data) => self.apply_opened(data),
            ScheduleEvent::PersonalSlotReserved(data) => self.apply_personal_reserved(data),
            ScheduleEvent::SeatReserved(data) => {
                if let Some(booking_id) = data.booking_id {
                    self.holders.insert(booking_id);
                }
                self.apply_change(&data);
            }
            ScheduleEvent::SeatReleased(data) => {
                if let Some(booking_id) = data.booking_id {
                    self.holders.remove(&booking_id);
                }
                self.apply_change(&data);
            }
            ScheduleEvent::ScheduleClosed(data) => {
                self.manually_closed = true;
                self.apply_change(&data);
            }
            ScheduleEvent::ScheduleReopened(data) => {
                self.manually_closed = false;
                self.apply_change(&data);
            }
            ScheduleEvent::CapacityMirrored(data)
            | ScheduleEvent::ScheduleCancelled(data)
            | ScheduleEvent::ScheduleFinished(data) => self.apply_change(&data),
        }
    }
}

// Query methods
impl Schedule {
    pub fn trainer_id(&self) -> Option<TrainerId> {
        self.trainer_id
    }

    pub fn window(&self) -> Option<TimeRange> {
        self.window
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> ScheduleStatus {
        self.status
    }

    /// Free seats.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Seats the slot was published with.
    pub fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    /// Bookings currently holding a seat.
    pub fn holders(&self) -> impl Iterator<Item = AggregateId> + '_ {
        self.holders.iter().copied()
    }

    pub fn holds(&self, booking_id: AggregateId) -> bool {
        self.holders.contains(&booking_id)
    }

    pub fn is_manually_closed(&self) -> bool {
        self.manually_closed
    }

    pub fn recurrence(&self) -> Option<RecurrenceLink> {
        self.recurrence
    }

    pub fn template_id(&self) -> Option<TemplateId> {
        self.template_id
    }

    /// Returns true if seats are managed by a curriculum pool.
    pub fn is_curriculum(&self) -> bool {
        matches!(
            self.recurrence,
            Some(RecurrenceLink {
                recurrence_type: RecurrenceType::Curriculum,
                ..
            })
        )
    }

    /// Slot details copied onto bookings.
    pub fn slot_context(&self) -> Option<SlotContext> {
        Some(SlotContext {
            trainer_id: self.trainer_id?,
            window: self.window?,
            title: self.title.clone(),
        })
    }
}

// Command methods (return events)
impl Schedule {
    /// Publishes a group slot with all seats free.
    pub fn open(
        &self,
        cmd: OpenSchedule,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        if self.id.is_some() {
            return Err(ScheduleError::AlreadyCreated);
        }
        if cmd.capacity == 0 {
            return Err(ScheduleError::InvalidCapacity {
                capacity: cmd.capacity,
            });
        }

        Ok(vec![ScheduleEvent::ScheduleOpened(ScheduleOpenedData {
            schedule_id: cmd.schedule_id,
            trainer_id: cmd.trainer_id,
            window: cmd.window,
            title: cmd.title,
            capacity: cmd.capacity,
            template_id: cmd.template_id,
            recurrence: cmd.recurrence,
            actor,
            opened_at: now,
        })])
    }

    /// Creates a 1:1 slot occupied by `booking_id`.
    pub fn reserve_personal(
        &self,
        slot: PersonalSlot,
        booking_id: AggregateId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        if self.id.is_some() {
            return Err(ScheduleError::AlreadyCreated);
        }

        Ok(vec![ScheduleEvent::PersonalSlotReserved(
            PersonalSlotReservedData {
                schedule_id: slot.schedule_id,
                trainer_id: slot.trainer_id,
                window: slot.window,
                title: slot.title,
                booking_id,
                actor,
                reserved_at: now,
            },
        )])
    }

    /// Takes one seat for `booking_id`. The last seat closes the slot.
    ///
    /// `deadline` is how long before the start reservations close.
    pub fn reserve_seat(
        &self,
        booking_id: AggregateId,
        deadline: Duration,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        let window = self.require_created()?;
        if self.is_curriculum() {
            return Err(ScheduleError::ReservationNotAllowedForCurriculum);
        }
        if self.status.is_terminal() || self.status == ScheduleStatus::Reserved {
            return Err(ScheduleError::InvalidStatus {
                current: self.status,
                action: "reserve a seat on",
            });
        }
        if self.capacity == 0 {
            return Err(ScheduleError::CapacityExceeded);
        }
        if self.status == ScheduleStatus::Closed {
            return Err(ScheduleError::InvalidStatus {
                current: self.status,
                action: "reserve a seat on",
            });
        }
        if self.holders.contains(&booking_id) {
            return Err(ScheduleError::SeatAlreadyHeld { booking_id });
        }
        let closes_at = window.start() - deadline;
        if now > closes_at {
            return Err(ScheduleError::DeadlineExceeded {
                deadline: closes_at,
            });
        }

        let capacity = self.capacity - 1;
        let new = if capacity == 0 {
            ScheduleStatus::Closed
        } else {
            ScheduleStatus::Open
        };

        Ok(vec![ScheduleEvent::SeatReserved(self.change_to(
            new,
            capacity,
            Some(booking_id),
            actor,
            None,
            now,
        ))])
    }

    /// Gives back the seat held by `booking_id`.
    ///
    /// A no-op on 1:1 slots and on slots that are already over or withdrawn.
    /// A slot closed only because it was full reopens; an administratively
    /// closed one stays closed.
    pub fn release_seat(
        &self,
        booking_id: AggregateId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        self.require_created()?;
        if self.status == ScheduleStatus::Reserved || self.status.is_terminal() {
            return Ok(vec![]);
        }
        if self.is_curriculum() {
            return Err(ScheduleError::ReservationNotAllowedForCurriculum);
        }
        if !self.holders.contains(&booking_id) {
            return Err(ScheduleError::SeatNotHeld { booking_id });
        }
        if self.capacity >= self.max_capacity {
            return Err(ScheduleError::CapacityOverflow {
                max_capacity: self.max_capacity,
            });
        }

        let new = if self.status == ScheduleStatus::Closed && !self.manually_closed {
            ScheduleStatus::Open
        } else {
            self.status
        };

        Ok(vec![ScheduleEvent::SeatReleased(self.change_to(
            new,
            self.capacity + 1,
            Some(booking_id),
            actor,
            None,
            now,
        ))])
    }

    /// Withdraws the slot. Inside `deadline` of the start this needs `force`.
    pub fn cancel(
        &self,
        force: bool,
        deadline: Duration,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        let window = self.require_created()?;
        if self.status.is_terminal() {
            return Err(ScheduleError::InvalidStatus {
                current: self.status,
                action: "cancel",
            });
        }
        let closes_at = window.start() - deadline;
        if !force && now > closes_at {
            return Err(ScheduleError::DeadlineExceeded {
                deadline: closes_at,
            });
        }

        Ok(vec![ScheduleEvent::ScheduleCancelled(self.change_to(
            ScheduleStatus::Cancelled,
            self.capacity,
            None,
            actor,
            reason,
            now,
        ))])
    }

    /// Copies the pool's seat count and open/closed state onto a curriculum
    /// occurrence. Produces nothing if the occurrence already matches.
    pub fn mirror_from_group(
        &self,
        remaining: u32,
        group_status: RecurrenceStatus,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        let window = self.require_created()?;
        if !self.is_curriculum() {
            return Err(ScheduleError::NotCurriculum);
        }
        if window.has_started(now) {
            return Err(ScheduleError::CannotChangePastSchedule);
        }
        if self.status.is_terminal() {
            return Err(ScheduleError::InvalidStatus {
                current: self.status,
                action: "mirror capacity onto",
            });
        }
        if remaining > self.max_capacity {
            return Err(ScheduleError::CapacityOverflow {
                max_capacity: self.max_capacity,
            });
        }

        let new = match group_status {
            RecurrenceStatus::Open => ScheduleStatus::Open,
            RecurrenceStatus::Closed => ScheduleStatus::Closed,
            // Terminal group states reach children through cancel/finish
            RecurrenceStatus::Cancelled | RecurrenceStatus::Finished => return Ok(vec![]),
        };
        if new == self.status && remaining == self.capacity {
            return Ok(vec![]);
        }

        Ok(vec![ScheduleEvent::CapacityMirrored(self.change_to(
            new, remaining, None, actor, None, now,
        ))])
    }

    /// Stops accepting bookings until [`Schedule::reopen`].
    pub fn close(
        &self,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        self.require_created()?;
        if self.is_curriculum() {
            return Err(ScheduleError::ManagedByGroup);
        }
        let closable = matches!(self.status, ScheduleStatus::Open | ScheduleStatus::Closed);
        if !closable || self.manually_closed {
            return Err(ScheduleError::InvalidStatus {
                current: self.status,
                action: "close",
            });
        }

        Ok(vec![ScheduleEvent::ScheduleClosed(self.change_to(
            ScheduleStatus::Closed,
            self.capacity,
            None,
            actor,
            reason,
            now,
        ))])
    }

    /// Resumes bookings on an administratively closed slot.
    pub fn reopen(
        &self,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        self.require_created()?;
        if self.is_curriculum() {
            return Err(ScheduleError::ManagedByGroup);
        }
        if !self.manually_closed || self.status != ScheduleStatus::Closed {
            return Err(ScheduleError::InvalidStatus {
                current: self.status,
                action: "reopen",
            });
        }

        let new = if self.capacity > 0 {
            ScheduleStatus::Open
        } else {
            ScheduleStatus::Closed
        };

        Ok(vec![ScheduleEvent::ScheduleReopened(self.change_to(
            new,
            self.capacity,
            None,
            actor,
            None,
            now,
        ))])
    }

    /// Retires a slot once its window is over.
    pub fn finish(
        &self,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        let window = self.require_created()?;
        if self.status.is_terminal() {
            return Err(ScheduleError::InvalidStatus {
                current: self.status,
                action: "finish",
            });
        }
        if !window.has_ended(now) {
            return Err(ScheduleError::NotEnded {
                ends_at: window.end(),
            });
        }

        Ok(vec![ScheduleEvent::ScheduleFinished(self.change_to(
            ScheduleStatus::Finished,
            self.capacity,
            None,
            actor,
            None,
            now,
        ))])
    }

    fn require_created(&self) -> Result<TimeRange, ScheduleError> {
        self.window.ok_or(ScheduleError::NotCreated)
    }

    fn change_to(
        &self,
        new: ScheduleStatus,
        capacity: u32,
        booking_id: Option<AggregateId>,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> ScheduleChangeData {
        ScheduleChangeData {
            previous: self.status,
            new,
            capacity,
            booking_id,
            actor,
            reason,
            changed_at: now,
        }
    }
}

// Event application helpers
impl Schedule {
    fn apply_opened(&mut self, data: ScheduleOpenedData) {
        self.id = Some(data.schedule_id);
        self.trainer_id = Some(data.trainer_id);
        self.window = Some(data.window);
        self.title = data.title;
        self.status = ScheduleStatus::Open;
        self.capacity = data.capacity;
        self.max_capacity = data.capacity;
        self.template_id = data.template_id;
        self.recurrence = data.recurrence;
    }

    fn apply_personal_reserved(&mut self, data: PersonalSlotReservedData) {
        self.id = Some(data.schedule_id);
        self.trainer_id = Some(data.trainer_id);
        self.window = Some(data.window);
        self.title = data.title;
        self.status = ScheduleStatus::Reserved;
        self.capacity = 0;
        self.max_capacity = 1;
        self.holders.insert(data.booking_id);
    }

    fn apply_change(&mut self, data: &ScheduleChangeData) {
        self.status = data.new;
        self.capacity = data.capacity;
    }
}
