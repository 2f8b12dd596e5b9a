use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// An immutable, past-tense fact about one aggregate.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Name stored in the `event_type` column next to the payload.
    fn event_type(&self) -> &'static str;
}

/// Trait for event-sourced aggregates.
///
/// Aggregates never mutate themselves from a command. Command methods take
/// `&self`, check the current state and return the facts to record; state
/// only changes through [`Aggregate::apply`], which is also how an aggregate
/// is rebuilt from its stream.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;
    type Error: std::error::Error + Send + Sync;

    fn aggregate_type() -> &'static str;

    /// `None` before the creation fact has been applied.
    fn id(&self) -> Option<AggregateId>;

    /// Stream version this state was folded from.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    /// Deterministic and infallible: the fact has already happened.
    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
