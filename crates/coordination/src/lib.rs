//! Application services for the reservation core.
//!
//! Coordinators run the multi-aggregate commands: each one validates against
//! the collaborator ports, commits the booking together with the capacity
//! holder it draws on, and hands the committed facts to the dispatcher.
//! Child-occurrence fan-out runs afterwards, one unit per child.

pub mod error;
pub mod fanout;
pub mod reservation;
pub mod schedules;
pub mod services;
pub mod ticket_restore;

pub use error::{CoordinationError, Result};
pub use fanout::FanOutReport;
pub use reservation::{
    Enrollment, ProgramCancellation, ReservationCoordinator, ReservePersonal, ReserveSeat,
};
pub use schedules::{GroupCancellation, ScheduleCancellation, ScheduleCoordinator};
pub use services::{
    AvailabilityError, Collaborators, InMemoryMembershipValidator, InMemoryTicketLedger,
    InMemoryTimeOffValidator, InMemoryTrainerValidator, MembershipError, MembershipValidator,
    StoredTimeOffValidator, TicketError, TicketLedger, TimeOffValidator, TrainerError,
    TrainerValidator,
};
pub use ticket_restore::TicketRestoreHandler;
