//! Tier-1 booking audit trail.
//!
//! Every booking fact becomes one history row. Listeners run synchronously
//! after commit and their failures surface to the caller.

mod memory;
mod postgres;

pub use memory::BookingHistoryView;
pub use postgres::PostgresBookingHistory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Actor, AggregateId};
use domain::booking::{BookingEvent, BookingStatus};
use domain::policy::CancellationClass;
use domain::{Aggregate, Booking};
use event_store::{EventEnvelope, EventId, Version};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Same-context listener run synchronously after a commit.
#[async_trait]
pub trait AuditListener: Send + Sync {
    /// Returns the name of this listener.
    fn name(&self) -> &'static str;

    /// Records one committed fact. Must tolerate seeing a fact twice.
    async fn record(&self, event: &EventEnvelope) -> Result<()>;
}

/// One row of a booking's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingHistoryRecord {
    pub event_id: EventId,
    pub booking_id: AggregateId,
    pub version: Version,
    /// None for the creation row.
    pub previous_status: Option<BookingStatus>,
    pub new_status: BookingStatus,
    pub actor: Actor,
    pub reason: Option<String>,
    pub classification: Option<CancellationClass>,
    pub recorded_at: DateTime<Utc>,
}

impl BookingHistoryRecord {
    /// Builds the history row for a booking fact, or None for other aggregates.
    pub fn from_event(event: &EventEnvelope) -> Result<Option<Self>> {
        if event.aggregate_type != Booking::aggregate_type() {
            return Ok(None);
        }

        let record = match event.decode::<BookingEvent>()? {
            BookingEvent::BookingCreated(data) => Self {
                event_id: event.event_id,
                booking_id: event.aggregate_id,
                version: event.version,
                previous_status: None,
                new_status: data.status,
                actor: data.actor,
                reason: None,
                classification: None,
                recorded_at: data.created_at,
            },
            BookingEvent::BookingConfirmed(t)
            | BookingEvent::BookingRejected(t)
            | BookingEvent::BookingCancelled(t)
            | BookingEvent::BookingAttended(t)
            | BookingEvent::BookingNoShow(t) => Self {
                event_id: event.event_id,
                booking_id: event.aggregate_id,
                version: event.version,
                previous_status: Some(t.previous),
                new_status: t.new,
                actor: t.actor,
                reason: t.reason,
                classification: t.classification,
                recorded_at: t.changed_at,
            },
        };
        Ok(Some(record))
    }
}
