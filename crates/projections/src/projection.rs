use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::Result;

/// How far a projection has read the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    pub events_processed: u64,
    /// Sequence of the last fact folded, 0 before the first.
    pub last_sequence: i64,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Counts one more fact; the sequence high-water mark never moves back.
    pub fn advance(&self, sequence: i64) -> Self {
        Self {
            events_processed: self.events_processed + 1,
            last_sequence: self.last_sequence.max(sequence),
        }
    }

    pub fn has_seen(&self, sequence: i64) -> bool {
        sequence <= self.last_sequence
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} facts through #{}", self.events_processed, self.last_sequence)
    }
}

/// A projection that folds stored facts into a read model.
///
/// Projections are rebuilt by replaying the store, so `handle` must accept
/// facts for aggregate types it does not care about and simply move on.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Drops everything folded so far, ahead of a full replay.
    async fn reset(&self) -> Result<()>;
}
