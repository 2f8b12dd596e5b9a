use thiserror::Error;

use crate::{AggregateId, Version};

/// Failures of the append-only fact log.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream moved past the version the writer observed.
    ///
    /// Callers may reload the aggregate and retry the command.
    #[error("stream {aggregate_id} is at version {actual}, writer expected {expected}")]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The batch handed to `append_streams` was malformed.
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("payload encoding: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns true if the caller may reload and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, EventStoreError>;
