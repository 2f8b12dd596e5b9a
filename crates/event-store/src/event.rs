use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateId;

/// Unique identifier for a stored fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream version of an aggregate, the optimistic concurrency token.
///
/// A fresh aggregate sits at version 0; its first fact is version 1 and each
/// further fact increments by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a new aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A stored fact together with its stream coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this fact.
    pub event_id: EventId,

    /// The type of the fact (e.g., "BookingCreated", "SeatReserved").
    pub event_type: String,

    /// The aggregate this fact belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Booking", "Schedule").
    pub aggregate_type: String,

    /// The version of the aggregate after this fact.
    pub version: Version,

    /// Store-wide commit order. Zero until the store assigns it.
    pub sequence: i64,

    /// When the fact was recorded.
    pub timestamp: DateTime<Utc>,

    /// The fact payload as JSON.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// A fact ready to append, stamped now. The store assigns `sequence`.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            sequence: 0,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Serializes `fact` as the payload of a new envelope.
    pub fn from_fact<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        event_type: impl Into<String>,
        fact: &T,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(fact)?;
        Ok(Self::new(aggregate_id, aggregate_type, version, event_type, payload))
    }

    /// Overrides the recording instant.
    pub fn recorded_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Deserializes the payload into a concrete fact type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
