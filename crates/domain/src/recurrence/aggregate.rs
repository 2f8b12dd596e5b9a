//! Recurrence group aggregate implementation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{Actor, AggregateId, TemplateId, TicketId, TrainerId, UserId};
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::policy::CancellationClass;

use super::{
    ChildOccurrence, PoolChangeData, RecurrenceError, RecurrenceEvent, RecurrencePattern,
    RecurrenceStatus, RecurrenceType, events::RecurrenceGroupCreatedData,
};

/// Everything needed to create a recurring program.
#[derive(Debug, Clone)]
pub struct CreateRecurrenceGroup {
    pub group_id: AggregateId,
    pub trainer_id: TrainerId,
    pub template_id: TemplateId,
    pub title: String,
    pub pattern: RecurrencePattern,
    pub recurrence_type: RecurrenceType,
    pub capacity: u32,
}

/// Recurrence group aggregate root.
///
/// Lays out the child occurrences once at creation. For curriculum programs
/// it also owns the seat pool every child mirrors; the children themselves
/// are separate aggregates and never change inside a group transaction.
#[derive(Debug, Clone, Default)]
pub struct RecurrenceGroup {
    id: Option<AggregateId>,
    version: Version,
    trainer_id: Option<TrainerId>,
    template_id: Option<TemplateId>,
    title: String,
    pattern: Option<RecurrencePattern>,
    recurrence_type: RecurrenceType,
    status: RecurrenceStatus,
    template_capacity: u32,
    remaining_capacity: u32,
    children: Vec<ChildOccurrence>,
    enrollments: BTreeMap<UserId, Vec<AggregateId>>,
    tickets: BTreeMap<UserId, TicketId>,
}

impl Aggregate for RecurrenceGroup {
    type Event = RecurrenceEvent;
    type Error = RecurrenceError;

    fn aggregate_type() -> &'static str {
        "RecurrenceGroup"
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
            RecurrenceEvent::RecurrenceGroupCreated(data) => self.apply_created(data),
            RecurrenceEvent::PoolSeatReserved(data) => {
                if let Some(user_id) = data.user_id {
                    self.enrollments.insert(user_id, data.booking_ids.clone());
                    if let Some(ticket_id) = data.ticket_id {
                        self.tickets.insert(user_id, ticket_id);
                    }
                }
                self.apply_change(&data);
            }
            RecurrenceEvent::PoolSeatReleased(data) => {
                if let Some(user_id) = data.user_id {
                    self.enrollments.remove(&user_id);
                    self.tickets.remove(&user_id);
                }
                self.apply_change(&data);
            }
            RecurrenceEvent::RecurrenceGroupCancelled(data)
            | RecurrenceEvent::RecurrenceGroupFinished(data) => self.apply_change(&data),
        }
    }
}

// Query methods
impl RecurrenceGroup {
    pub fn trainer_id(&self) -> Option<TrainerId> {
        self.trainer_id
    }

    pub fn template_id(&self) -> Option<TemplateId> {
        self.template_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn pattern(&self) -> Option<&RecurrencePattern> {
        self.pattern.as_ref()
    }

    pub fn recurrence_type(&self) -> RecurrenceType {
        self.recurrence_type
    }

    pub fn status(&self) -> RecurrenceStatus {
        self.status
    }

    pub fn template_capacity(&self) -> u32 {
        self.template_capacity
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.remaining_capacity
    }

    /// Occurrences in date order.
    pub fn children(&self) -> &[ChildOccurrence] {
        &self.children
    }

    pub fn first_occurrence(&self) -> Option<&ChildOccurrence> {
        self.children.first()
    }

    /// Bookings held by `user_id`, one per occurrence.
    pub fn enrollment(&self, user_id: UserId) -> Option<&[AggregateId]> {
        self.enrollments.get(&user_id).map(Vec::as_slice)
    }

    /// Ticket paying for `user_id`'s enrollment.
    pub fn enrollment_ticket(&self, user_id: UserId) -> Option<TicketId> {
        self.tickets.get(&user_id).copied()
    }

    /// Enrolled members with their bookings.
    pub fn enrollments(&self) -> impl Iterator<Item = (UserId, &[AggregateId])> + '_ {
        self.enrollments.iter().map(|(u, b)| (*u, b.as_slice()))
    }

    pub fn is_curriculum(&self) -> bool {
        self.recurrence_type == RecurrenceType::Curriculum
    }
}

// Command methods (return events)
impl RecurrenceGroup {
    /// Creates the program and lays out one occurrence per matching date.
    pub fn create(
        &self,
        cmd: CreateRecurrenceGroup,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecurrenceEvent>, RecurrenceError> {
        if self.id.is_some() {
            return Err(RecurrenceError::AlreadyCreated);
        }
        if cmd.capacity == 0 {
            return Err(RecurrenceError::InvalidCapacity {
                capacity: cmd.capacity,
            });
        }

        let children = cmd
            .pattern
            .expand()?
            .into_iter()
            .map(|window| ChildOccurrence {
                schedule_id: AggregateId::new(),
                window,
            })
            .collect();

        Ok(vec![RecurrenceEvent::RecurrenceGroupCreated(
            RecurrenceGroupCreatedData {
                group_id: cmd.group_id,
                trainer_id: cmd.trainer_id,
                template_id: cmd.template_id,
                title: cmd.title,
                pattern: cmd.pattern,
                recurrence_type: cmd.recurrence_type,
                template_capacity: cmd.capacity,
                children,
                actor,
                created_at: now,
            },
        )])
    }

    /// Enrolls `user_id` in the whole program, taking one pool seat.
    ///
    /// `booking_ids` are the member's bookings, one per occurrence, all paid
    /// for by `ticket_id`. The last seat closes the pool.
    pub fn reserve_from_pool(
        &self,
        user_id: UserId,
        booking_ids: Vec<AggregateId>,
        ticket_id: Option<TicketId>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecurrenceEvent>, RecurrenceError> {
        let pattern = self.require_created()?;
        if !self.is_curriculum() {
            return Err(RecurrenceError::NotCurriculum);
        }
        if self.status.is_terminal() {
            return Err(RecurrenceError::InvalidStatus {
                current: self.status,
                action: "enroll in",
            });
        }
        if self.remaining_capacity == 0 {
            return Err(RecurrenceError::CapacityExceeded);
        }
        if self.status == RecurrenceStatus::Closed {
            return Err(RecurrenceError::InvalidStatus {
                current: self.status,
                action: "enroll in",
            });
        }
        if pattern.local_date(now) >= pattern.start_date {
            return Err(RecurrenceError::ProgramAlreadyStarted {
                start_date: pattern.start_date,
            });
        }
        if self.enrollments.contains_key(&user_id) {
            return Err(RecurrenceError::AlreadyEnrolled { user_id });
        }

        let remaining = self.remaining_capacity - 1;
        let new = if remaining == 0 {
            RecurrenceStatus::Closed
        } else {
            RecurrenceStatus::Open
        };

        Ok(vec![RecurrenceEvent::PoolSeatReserved(PoolChangeData {
            user_id: Some(user_id),
            booking_ids,
            ticket_id,
            ..self.change_to(new, remaining, actor, None, now)
        })])
    }

    /// Returns `user_id`'s seat to the pool and reopens it.
    ///
    /// The released fact lists the member's bookings so the caller can
    /// cancel them in the same unit. A free departure refunds the
    /// enrollment's ticket.
    pub fn release_to_pool(
        &self,
        user_id: UserId,
        classification: CancellationClass,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecurrenceEvent>, RecurrenceError> {
        self.require_created()?;
        if !self.is_curriculum() {
            return Err(RecurrenceError::NotCurriculum);
        }
        if self.status.is_terminal() {
            return Err(RecurrenceError::InvalidStatus {
                current: self.status,
                action: "leave",
            });
        }
        if self.remaining_capacity >= self.template_capacity {
            return Err(RecurrenceError::CancelCapacityError {
                capacity: self.template_capacity,
            });
        }
        let booking_ids = self
            .enrollments
            .get(&user_id)
            .cloned()
            .ok_or(RecurrenceError::NotEnrolled { user_id })?;

        let ticket_id = self.enrollment_ticket(user_id);
        let refunded_tickets = ticket_id
            .filter(|_| classification.restores_ticket())
            .into_iter()
            .collect();

        Ok(vec![RecurrenceEvent::PoolSeatReleased(PoolChangeData {
            user_id: Some(user_id),
            booking_ids,
            ticket_id,
            classification: Some(classification),
            refunded_tickets,
            ..self.change_to(
                RecurrenceStatus::Open,
                self.remaining_capacity + 1,
                actor,
                reason,
                now,
            )
        })])
    }

    /// Withdraws the program and refunds every enrollment's ticket.
    /// Children are cancelled separately by the caller.
    pub fn cancel_all(
        &self,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecurrenceEvent>, RecurrenceError> {
        self.require_created()?;
        if self.status.is_terminal() {
            return Err(RecurrenceError::InvalidStatus {
                current: self.status,
                action: "cancel",
            });
        }

        Ok(vec![RecurrenceEvent::RecurrenceGroupCancelled(PoolChangeData {
            classification: Some(CancellationClass::FreeCancel),
            refunded_tickets: self.tickets.values().copied().collect(),
            ..self.change_to(
                RecurrenceStatus::Cancelled,
                self.remaining_capacity,
                actor,
                reason,
                now,
            )
        })])
    }

    /// Retires the program once its last occurrence is over.
    pub fn finish(
        &self,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecurrenceEvent>, RecurrenceError> {
        self.require_created()?;
        if self.status.is_terminal() {
            return Err(RecurrenceError::InvalidStatus {
                current: self.status,
                action: "finish",
            });
        }
        if let Some(last) = self.children.last()
            && !last.window.has_ended(now)
        {
            return Err(RecurrenceError::NotEnded {
                ends_at: last.window.end(),
            });
        }

        Ok(vec![RecurrenceEvent::RecurrenceGroupFinished(self.change_to(
            RecurrenceStatus::Finished,
            self.remaining_capacity,
            actor,
            None,
            now,
        ))])
    }

    fn require_created(&self) -> Result<&RecurrencePattern, RecurrenceError> {
        self.pattern.as_ref().ok_or(RecurrenceError::NotCreated)
    }

    fn change_to(
        &self,
        new: RecurrenceStatus,
        remaining_capacity: u32,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> PoolChangeData {
        PoolChangeData {
            previous: self.status,
            new,
            remaining_capacity,
            user_id: None,
            booking_ids: Vec::new(),
            ticket_id: None,
            classification: None,
            refunded_tickets: Vec::new(),
            actor,
            reason,
            changed_at: now,
        }
    }
}

// Event application helpers
impl RecurrenceGroup {
    fn apply_created(&mut self, data: RecurrenceGroupCreatedData) {
        self.id = Some(data.group_id);
        self.trainer_id = Some(data.trainer_id);
        self.template_id = Some(data.template_id);
        self.title = data.title;
        self.pattern = Some(data.pattern);
        self.recurrence_type = data.recurrence_type;
        self.status = RecurrenceStatus::Open;
        self.template_capacity = data.template_capacity;
        self.remaining_capacity = data.template_capacity;
        self.children = data.children;
    }

    fn apply_change(&mut self, data: &PoolChangeData) {
        self.status = data.new;
        self.remaining_capacity = data.remaining_capacity;
    }
}
