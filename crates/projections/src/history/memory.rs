//! In-memory booking history.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::booking::BookingStatus;
use event_store::{EventEnvelope, EventId};
use tokio::sync::RwLock;

use super::{AuditListener, BookingHistoryRecord};
use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

#[derive(Default)]
struct HistoryState {
    records: HashMap<AggregateId, Vec<BookingHistoryRecord>>,
    seen: HashSet<EventId>,
    position: ProjectionPosition,
}

/// Booking audit trail kept in memory.
///
/// Works both as a tier-1 listener and as a replayable projection.
#[derive(Clone, Default)]
pub struct BookingHistoryView {
    state: Arc<RwLock<HistoryState>>,
}

impl BookingHistoryView {
    /// Creates a new empty history view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the trail of one booking in version order.
    pub async fn history(&self, booking_id: AggregateId) -> Vec<BookingHistoryRecord> {
        self.state
            .read()
            .await
            .records
            .get(&booking_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the latest status recorded for a booking.
    pub async fn current_status(&self, booking_id: AggregateId) -> Option<BookingStatus> {
        self.state
            .read()
            .await
            .records
            .get(&booking_id)
            .and_then(|r| r.last())
            .map(|r| r.new_status)
    }

    /// Returns the total number of rows.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.seen.len()
    }

    async fn store(&self, event: &EventEnvelope) -> Result<()> {
        let record = BookingHistoryRecord::from_event(event)?;

        let mut state = self.state.write().await;
        state.position = state.position.advance(event.sequence);
        let Some(record) = record else {
            return Ok(());
        };
        if !state.seen.insert(record.event_id) {
            return Ok(());
        }

        let trail = state.records.entry(record.booking_id).or_default();
        trail.push(record);
        trail.sort_by_key(|r| r.version);
        Ok(())
    }
}

#[async_trait]
impl AuditListener for BookingHistoryView {
    fn name(&self) -> &'static str {
        "BookingHistoryView"
    }

    async fn record(&self, event: &EventEnvelope) -> Result<()> {
        self.store(event).await
    }
}

#[async_trait]
impl Projection for BookingHistoryView {
    fn name(&self) -> &'static str {
        "BookingHistoryView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        self.store(event).await
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = HistoryState::default();
        Ok(())
    }
}

impl ReadModel for BookingHistoryView {
    fn name(&self) -> &'static str {
        "BookingHistoryView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.records.len()).unwrap_or(0)
    }
}
