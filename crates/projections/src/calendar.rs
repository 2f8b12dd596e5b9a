//! Calendar read model fed by integration events.
//!
//! Stands in for the downstream calendar context: it only sees tier-2
//! events, which may arrive twice or out of order across aggregates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, TimeRange, TrainerId, UserId};
use domain::BookingStatus;
use event_store::Version;
use tokio::sync::RwLock;

use crate::Result;
use crate::integration::{IntegrationEvent, IntegrationHandler};
use crate::read_model::ReadModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Class,
    Booking,
    Program,
    TimeOff,
}

/// One calendar entry, keyed by the aggregate that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub source_id: AggregateId,
    pub kind: EntryKind,
    pub trainer_id: TrainerId,
    pub user_id: Option<UserId>,
    pub title: String,
    pub window: TimeRange,
    pub status: String,
    /// False once the entry is cancelled, rejected or removed.
    pub visible: bool,
    pub version: Version,
}

/// Latest-version-wins calendar keyed by source aggregate.
#[derive(Clone, Default)]
pub struct CalendarProjector {
    entries: Arc<RwLock<HashMap<AggregateId, CalendarEntry>>>,
}

impl CalendarProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entry(&self, source_id: AggregateId) -> Option<CalendarEntry> {
        self.entries.read().await.get(&source_id).cloned()
    }

    /// Visible entries on a trainer's calendar, ordered by start.
    pub async fn for_trainer(&self, trainer_id: TrainerId) -> Vec<CalendarEntry> {
        let entries = self.entries.read().await;
        let mut found: Vec<_> = entries
            .values()
            .filter(|e| e.visible && e.trainer_id == trainer_id && e.kind != EntryKind::Booking)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.window.start());
        found
    }

    /// Visible bookings on a member's calendar, ordered by start.
    pub async fn for_member(&self, user_id: UserId) -> Vec<CalendarEntry> {
        let entries = self.entries.read().await;
        let mut found: Vec<_> = entries
            .values()
            .filter(|e| e.visible && e.user_id == Some(user_id))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.window.start());
        found
    }

    fn to_entry(event: &IntegrationEvent) -> CalendarEntry {
        let source = event.source();
        match event {
            IntegrationEvent::BookingChanged(e) => CalendarEntry {
                source_id: source.source_id,
                kind: EntryKind::Booking,
                trainer_id: e.trainer_id,
                user_id: Some(e.user_id),
                title: e.title.clone(),
                window: e.window,
                status: e.new.to_string(),
                visible: !matches!(e.new, BookingStatus::Rejected | BookingStatus::Cancelled),
                version: source.source_version,
            },
            IntegrationEvent::ScheduleChanged(e) => CalendarEntry {
                source_id: source.source_id,
                kind: EntryKind::Class,
                trainer_id: e.trainer_id,
                user_id: None,
                title: e.title.clone(),
                window: e.window,
                status: e.new.to_string(),
                visible: e.new != domain::ScheduleStatus::Cancelled,
                version: source.source_version,
            },
            IntegrationEvent::RecurrenceGroupChanged(e) => CalendarEntry {
                source_id: source.source_id,
                kind: EntryKind::Program,
                trainer_id: e.trainer_id,
                user_id: None,
                title: e.title.clone(),
                window: e.window,
                status: e.new.to_string(),
                visible: e.new != domain::RecurrenceStatus::Cancelled,
                version: source.source_version,
            },
            IntegrationEvent::TimeOffChanged(e) => CalendarEntry {
                source_id: source.source_id,
                kind: EntryKind::TimeOff,
                trainer_id: e.trainer_id,
                user_id: None,
                title: e.reason.clone().unwrap_or_else(|| "Time off".to_string()),
                window: e.window,
                status: e.new.to_string(),
                visible: e.new == domain::TimeOffStatus::Active,
                version: source.source_version,
            },
        }
    }
}

#[async_trait]
impl IntegrationHandler for CalendarProjector {
    fn name(&self) -> &'static str {
        "CalendarProjector"
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<()> {
        let entry = Self::to_entry(event);
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&entry.source_id)
            && existing.version >= entry.version
        {
            tracing::debug!(
                source_id = %entry.source_id,
                stored = %existing.version,
                received = %entry.version,
                "stale calendar update ignored"
            );
            return Ok(());
        }

        entries.insert(entry.source_id, entry);
        Ok(())
    }
}

impl ReadModel for CalendarProjector {
    fn name(&self) -> &'static str {
        "CalendarProjector"
    }

    fn count(&self) -> usize {
        self.entries.try_read().map(|e| e.len()).unwrap_or(0)
    }
}
