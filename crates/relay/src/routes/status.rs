//! Relay progress endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use serde::Serialize;

use crate::RelayState;
use crate::error::Result;

#[derive(Debug, Serialize)]
pub struct RelayStatus {
    pub consumer: String,
    /// Last store sequence dispatched.
    pub checkpoint: i64,
    pub audit_listeners: usize,
    pub integration_handlers: usize,
}

/// GET /relay
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<RelayState<S>>>,
) -> Result<Json<RelayStatus>> {
    Ok(Json(RelayStatus {
        consumer: state.relay.consumer().to_string(),
        checkpoint: state.relay.checkpoint().await?,
        audit_listeners: state.dispatcher.audit_count(),
        integration_handlers: state.dispatcher.handler_count(),
    }))
}
