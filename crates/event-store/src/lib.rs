//! Append-only fact log for the reservation core.
//!
//! Every aggregate owns one stream of facts ordered by [`Version`]. Appends
//! carry the version the writer last observed; a stream that moved on in the
//! meantime rejects the append with [`EventStoreError::ConcurrencyConflict`].
//! [`EventStore::append_streams`] commits facts for several aggregates in one
//! atomic unit, and every committed fact receives a store-wide sequence
//! number that the outbox relay uses as its cursor.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream, StreamAppend};
