use thiserror::Error;

/// Failures while folding or dispatching committed facts.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("reading facts: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    #[error("undecodable payload: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The audit store rejected a write.
    #[error("audit store: {0}")]
    Database(#[from] sqlx::Error),

    /// A fact arrived for an aggregate whose creation fact is missing.
    #[error("{aggregate_type} {aggregate_id} has no creation fact")]
    MissingCreation {
        aggregate_type: String,
        aggregate_id: common::AggregateId,
    },

    /// A tier-1 audit listener failed. The write already committed, so the
    /// audit trail is behind until the relay replays the fact.
    #[error("audit listener {listener} failed on {event_type}: {source}")]
    Audit {
        listener: &'static str,
        event_type: String,
        #[source]
        source: Box<ProjectionError>,
    },

    #[error("{0}")]
    Projection(String),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
