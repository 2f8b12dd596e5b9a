//! Shared types for the reservation core: identifiers, actors and time values.

pub mod time;
pub mod types;

pub use time::{Clock, FixedClock, SystemClock, TimeRange, TimeRangeError};
pub use types::{Actor, AggregateId, TemplateId, TicketId, TrainerId, UserId};
