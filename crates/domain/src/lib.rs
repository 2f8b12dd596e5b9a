//! Domain layer for the reservation core.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for event-sourced entities
//! - CommandHandler and UnitOfWork for single and multi-aggregate commits
//! - The cancellation and deadline policy
//! - Booking, Schedule, RecurrenceGroup and TimeOff aggregates

pub mod aggregate;
pub mod booking;
pub mod command;
pub mod error;
pub mod policy;
pub mod recurrence;
pub mod schedule;
pub mod time_off;
pub mod unit_of_work;

pub use aggregate::{Aggregate, DomainEvent};
pub use booking::{
    Booking, BookingError, BookingEvent, BookingStatus, BookingType, NewBooking, SlotContext,
};
pub use command::{CommandHandler, CommandResult};
pub use error::{DomainError, ErrorKind};
pub use policy::{CancellationClass, ReservationTier};
pub use recurrence::{
    ChildOccurrence, CreateRecurrenceGroup, RecurrenceError, RecurrenceEvent, RecurrenceGroup,
    RecurrencePattern, RecurrenceStatus, RecurrenceType,
};
pub use schedule::{
    OpenSchedule, PersonalSlot, RecurrenceLink, Schedule, ScheduleError, ScheduleEvent,
    ScheduleStatus,
};
pub use time_off::{RegisterTimeOff, TimeOff, TimeOffError, TimeOffEvent, TimeOffStatus};
pub use unit_of_work::{Committed, UnitOfWork};
