//! After-commit side of the reservation core.
//!
//! This crate provides:
//! - [`AuditListener`] tier-1 listeners: the in-memory [`BookingHistoryView`]
//!   and the [`PostgresBookingHistory`] store
//! - [`IntegrationEvent`] tier-2 events and the [`IntegrationHandler`] trait
//! - [`EventDispatcher`] running both tiers over a committed batch
//! - [`IdempotentHandler`] redelivery guard and the [`CalendarProjector`]
//!   downstream read model
//! - [`OutboxRelay`] replaying facts after a persisted checkpoint
//! - [`ProjectionProcessor`] catch-up and rebuild for [`Projection`]s

pub mod calendar;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod idempotency;
pub mod integration;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod relay;

pub use calendar::{CalendarEntry, CalendarProjector, EntryKind};
pub use dispatcher::{DispatchReport, EventDispatcher};
pub use error::{ProjectionError, Result};
pub use history::{AuditListener, BookingHistoryRecord, BookingHistoryView, PostgresBookingHistory};
pub use idempotency::IdempotentHandler;
pub use integration::{
    BookingChanged, EventSource, IdempotencyKey, IntegrationEvent, IntegrationHandler,
    IntegrationTranslator, RecurrenceGroupChanged, ScheduleChanged, TimeOffChanged,
};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use relay::OutboxRelay;
