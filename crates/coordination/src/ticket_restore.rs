//! Downstream ticket restoration driven by booking facts.

use std::sync::Arc;

use async_trait::async_trait;
use common::{Actor, TicketId};
use domain::{BookingStatus, BookingType};
use projections::{IntegrationEvent, IntegrationHandler, ProjectionError};

use crate::services::TicketLedger;

/// Gives a member's ticket back when a booking ends without using it.
///
/// Free cancellations and rejections of single bookings restore; penalty
/// cancellations keep the ticket consumed. A curriculum ticket pays for the
/// whole enrollment, so per-occurrence booking facts never touch it: it comes
/// back only through the refunds listed on the program's own pool facts.
pub struct TicketRestoreHandler {
    ledger: Arc<dyn TicketLedger>,
}

impl TicketRestoreHandler {
    pub fn new(ledger: Arc<dyn TicketLedger>) -> Self {
        Self { ledger }
    }

    async fn restore(&self, ticket_id: TicketId, actor: &Actor) -> projections::Result<()> {
        self.ledger
            .restore(ticket_id, actor)
            .await
            .map_err(|e| ProjectionError::Projection(e.to_string()))
    }
}

#[async_trait]
impl IntegrationHandler for TicketRestoreHandler {
    fn name(&self) -> &'static str {
        "TicketRestoreHandler"
    }

    async fn handle(&self, event: &IntegrationEvent) -> projections::Result<()> {
        match event {
            IntegrationEvent::BookingChanged(changed) => {
                let Some(ticket_id) = changed.ticket_id else {
                    return Ok(());
                };
                if changed.booking_type == BookingType::GroupCurriculum {
                    return Ok(());
                }
                let restores = match changed.new {
                    BookingStatus::Rejected => true,
                    BookingStatus::Cancelled => changed
                        .classification
                        .is_some_and(|class| class.restores_ticket()),
                    _ => false,
                };
                if !restores {
                    return Ok(());
                }

                self.restore(ticket_id, &changed.actor).await?;
                tracing::info!(
                    %ticket_id,
                    booking_id = %changed.source.source_id,
                    status = %changed.new,
                    "ticket restored"
                );
            }
            IntegrationEvent::RecurrenceGroupChanged(changed) => {
                for ticket_id in &changed.refunded_tickets {
                    self.restore(*ticket_id, &changed.actor).await?;
                    tracing::info!(
                        %ticket_id,
                        group_id = %changed.source.source_id,
                        status = %changed.new,
                        "enrollment ticket restored"
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }
}
