//! Time-off domain events.

use chrono::{DateTime, Utc};
use common::{Actor, AggregateId, TimeRange, TrainerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events that can occur on a time-off aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TimeOffEvent {
    TimeOffRegistered(TimeOffRegisteredData),
    TimeOffRemoved(TimeOffRemovedData),
}

impl DomainEvent for TimeOffEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TimeOffEvent::TimeOffRegistered(_) => "TimeOffRegistered",
            TimeOffEvent::TimeOffRemoved(_) => "TimeOffRemoved",
        }
    }
}

/// Data for TimeOffRegistered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOffRegisteredData {
    pub time_off_id: AggregateId,
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub reason: Option<String>,
    pub actor: Actor,
    pub registered_at: DateTime<Utc>,
}

/// Data for TimeOffRemoved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOffRemovedData {
    pub actor: Actor,
    pub removed_at: DateTime<Utc>,
}
