//! Outbox relay service.
//!
//! Replays committed facts from the event store into the booking audit trail
//! and the calendar read model, and exposes liveness, progress and
//! Prometheus metrics over HTTP.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{
    AuditListener, CalendarProjector, EventDispatcher, IdempotentHandler, OutboxRelay,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared state for the status routes and the polling task.
pub struct RelayState<S: EventStore> {
    pub relay: Arc<OutboxRelay<S>>,
    pub dispatcher: Arc<EventDispatcher<S>>,
    pub calendar: CalendarProjector,
}

/// Wires the dispatcher and relay over `store`.
///
/// `audit` is the tier-1 history sink; the calendar runs as a tier-2 handler
/// behind the redelivery guard.
pub fn create_state<S: EventStore + Clone + 'static>(
    store: S,
    audit: Arc<dyn AuditListener>,
    config: &Config,
) -> Arc<RelayState<S>> {
    let calendar = CalendarProjector::new();
    let dispatcher = Arc::new(
        EventDispatcher::new(store.clone())
            .with_audit(audit)
            .with_handler(Arc::new(IdempotentHandler::new(calendar.clone()))),
    );
    let relay = Arc::new(OutboxRelay::new(
        store,
        dispatcher.clone(),
        config.consumer.clone(),
        config.batch_size,
    ));

    Arc::new(RelayState {
        relay,
        dispatcher,
        calendar,
    })
}

/// Creates the Axum router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<RelayState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/relay", get(routes::status::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
