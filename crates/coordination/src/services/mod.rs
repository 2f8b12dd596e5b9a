//! Collaborator ports and in-memory implementations.

pub mod availability;
pub mod membership;
pub mod tickets;
pub mod trainers;

pub use availability::{
    AvailabilityError, InMemoryTimeOffValidator, StoredTimeOffValidator, TimeOffValidator,
};
pub use membership::{InMemoryMembershipValidator, MembershipError, MembershipValidator};
pub use tickets::{InMemoryTicketLedger, TicketError, TicketLedger};
pub use trainers::{InMemoryTrainerValidator, TrainerError, TrainerValidator};

use std::sync::Arc;

use common::{Clock, SystemClock};

/// The ports a coordinator talks to, shared by both coordinators.
#[derive(Clone)]
pub struct Collaborators {
    pub tickets: Arc<dyn TicketLedger>,
    pub membership: Arc<dyn MembershipValidator>,
    pub trainers: Arc<dyn TrainerValidator>,
    pub availability: Arc<dyn TimeOffValidator>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// In-memory collaborators on the system clock.
    pub fn in_memory() -> Self {
        Self {
            tickets: Arc::new(InMemoryTicketLedger::new()),
            membership: Arc::new(InMemoryMembershipValidator::new()),
            trainers: Arc::new(InMemoryTrainerValidator::new()),
            availability: Arc::new(InMemoryTimeOffValidator::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
