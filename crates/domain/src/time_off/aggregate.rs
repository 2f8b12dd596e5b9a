//! Time-off aggregate implementation.

use chrono::{DateTime, Utc};
use common::{Actor, AggregateId, TimeRange, TrainerId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{TimeOffError, TimeOffEvent, TimeOffRegisteredData, TimeOffRemovedData};

/// The status of a time-off block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeOffStatus {
    #[default]
    Active,
    Removed,
}

impl TimeOffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOffStatus::Active => "ACTIVE",
            TimeOffStatus::Removed => "REMOVED",
        }
    }
}

impl std::fmt::Display for TimeOffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RegisterTimeOff {
    pub time_off_id: AggregateId,
    pub trainer_id: TrainerId,
    pub window: TimeRange,
    pub reason: Option<String>,
}

/// A window in which a trainer is unavailable.
#[derive(Debug, Clone, Default)]
pub struct TimeOff {
    id: Option<AggregateId>,
    version: Version,
    trainer_id: Option<TrainerId>,
    window: Option<TimeRange>,
    reason: Option<String>,
    status: TimeOffStatus,
}

impl Aggregate for TimeOff {
    type Event = TimeOffEvent;
    type Error = TimeOffError;

    fn aggregate_type() -> &'static str {
        "TimeOff"
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
            TimeOffEvent::TimeOffRegistered(data) => {
                self.id = Some(data.time_off_id);
                self.trainer_id = Some(data.trainer_id);
                self.window = Some(data.window);
                self.reason = data.reason;
                self.status = TimeOffStatus::Active;
            }
            TimeOffEvent::TimeOffRemoved(_) => {
                self.status = TimeOffStatus::Removed;
            }
        }
    }
}

impl TimeOff {
    pub fn trainer_id(&self) -> Option<TrainerId> {
        self.trainer_id
    }

    pub fn window(&self) -> Option<TimeRange> {
        self.window
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn status(&self) -> TimeOffStatus {
        self.status
    }

    /// Returns true if the block is active and overlaps `window`.
    pub fn blocks(&self, window: &TimeRange) -> bool {
        self.status == TimeOffStatus::Active && self.window.is_some_and(|w| w.overlaps(window))
    }

    pub fn register(
        &self,
        cmd: RegisterTimeOff,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<TimeOffEvent>, TimeOffError> {
        if self.id.is_some() {
            return Err(TimeOffError::AlreadyCreated);
        }

        Ok(vec![TimeOffEvent::TimeOffRegistered(TimeOffRegisteredData {
            time_off_id: cmd.time_off_id,
            trainer_id: cmd.trainer_id,
            window: cmd.window,
            reason: cmd.reason,
            actor,
            registered_at: now,
        })])
    }

    pub fn remove(&self, actor: Actor, now: DateTime<Utc>) -> Result<Vec<TimeOffEvent>, TimeOffError> {
        if self.id.is_none() {
            return Err(TimeOffError::NotCreated);
        }
        if self.status == TimeOffStatus::Removed {
            return Err(TimeOffError::AlreadyRemoved);
        }

        Ok(vec![TimeOffEvent::TimeOffRemoved(TimeOffRemovedData {
            actor,
            removed_at: now,
        })])
    }
}
