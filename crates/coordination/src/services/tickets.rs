//! Ticket ledger port and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{Actor, TicketId, UserId};
use domain::ReservationTier;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("Member {user_id} has no tickets left")]
    Exhausted { user_id: UserId },

    /// Another consumption raced this one.
    #[error("Ticket balance of {user_id} changed concurrently")]
    Conflict { user_id: UserId },

    #[error("Unknown ticket {ticket_id}")]
    UnknownTicket { ticket_id: TicketId },
}

/// Session balance owned by the ticket context.
#[async_trait]
pub trait TicketLedger: Send + Sync {
    /// Consumes one ticket of the kind `tier` requires.
    async fn consume_one(&self, user_id: UserId, tier: ReservationTier)
    -> Result<TicketId, TicketError>;

    /// Gives a consumed ticket back. Restoring twice is a no-op.
    async fn restore(&self, ticket_id: TicketId, actor: &Actor) -> Result<(), TicketError>;
}

#[derive(Debug)]
struct IssuedTicket {
    user_id: UserId,
    tier: ReservationTier,
    consumed: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<(UserId, ReservationTier), u32>,
    issued: HashMap<TicketId, IssuedTicket>,
    restores: usize,
    fail_with_conflict: bool,
}

/// In-memory ticket ledger for tests and local wiring.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryTicketLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` tickets of kind `tier` to a member's balance.
    pub fn grant(&self, user_id: UserId, tier: ReservationTier, count: u32) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state.balances.entry((user_id, tier)).or_default() += count;
    }

    pub fn balance(&self, user_id: UserId, tier: ReservationTier) -> u32 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.balances.get(&(user_id, tier)).copied().unwrap_or(0)
    }

    pub fn is_consumed(&self, ticket_id: TicketId) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.issued.get(&ticket_id).is_some_and(|t| t.consumed)
    }

    /// Returns how many restores actually gave a ticket back.
    pub fn restore_count(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).restores
    }

    /// Makes every consumption fail with a conflict.
    pub fn set_fail_with_conflict(&self, fail: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).fail_with_conflict = fail;
    }
}

#[async_trait]
impl TicketLedger for InMemoryTicketLedger {
    async fn consume_one(
        &self,
        user_id: UserId,
        tier: ReservationTier,
    ) -> Result<TicketId, TicketError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_with_conflict {
            return Err(TicketError::Conflict { user_id });
        }
        let balance = state.balances.entry((user_id, tier)).or_default();
        if *balance == 0 {
            return Err(TicketError::Exhausted { user_id });
        }
        *balance -= 1;

        let ticket_id = TicketId::new();
        state.issued.insert(
            ticket_id,
            IssuedTicket {
                user_id,
                tier,
                consumed: true,
            },
        );
        Ok(ticket_id)
    }

    async fn restore(&self, ticket_id: TicketId, actor: &Actor) -> Result<(), TicketError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let ticket = state
            .issued
            .get_mut(&ticket_id)
            .ok_or(TicketError::UnknownTicket { ticket_id })?;
        if !ticket.consumed {
            return Ok(());
        }
        ticket.consumed = false;
        let key = (ticket.user_id, ticket.tier);

        *state.balances.entry(key).or_default() += 1;
        state.restores += 1;
        tracing::debug!(%ticket_id, %actor, "ticket restored");
        Ok(())
    }
}
