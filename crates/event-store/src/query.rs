use crate::{AggregateId, EventEnvelope};

/// Filter over stored facts, answered in commit (sequence) order.
///
/// An empty `fact_types` list matches every fact type.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub stream: Option<AggregateId>,
    pub aggregate_type: Option<String>,
    pub fact_types: Vec<String>,
    /// Exclusive lower bound on `sequence`. Zero reads from the start.
    pub after_sequence: i64,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts of one aggregate stream.
    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self {
            stream: Some(aggregate_id),
            ..Self::default()
        }
    }

    /// Everything committed after `sequence`, the relay's read position.
    pub fn after(sequence: i64) -> Self {
        Self {
            after_sequence: sequence,
            ..Self::default()
        }
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Adds a fact type to the accepted set.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.fact_types.push(event_type.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` passes every filter except `limit`.
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        event.sequence > self.after_sequence
            && self.stream.is_none_or(|id| event.aggregate_id == id)
            && self
                .aggregate_type
                .as_deref()
                .is_none_or(|t| event.aggregate_type == t)
            && (self.fact_types.is_empty() || self.fact_types.contains(&event.event_type))
    }
}
