//! After-commit dispatch of committed facts.
//!
//! Runs in two tiers:
//! 1. Audit listeners, synchronously, in commit order. The first failure is
//!    logged and returned; the write itself has already committed.
//! 2. Integration handlers, once every audit listener succeeded. Failures
//!    are logged and counted but never returned.

use std::sync::Arc;

use domain::Committed;
use event_store::{EventEnvelope, EventStore};

use crate::history::AuditListener;
use crate::integration::{IntegrationHandler, IntegrationTranslator};
use crate::{ProjectionError, Result};

/// Outcome of dispatching one batch of committed facts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Facts that went through every audit listener.
    pub audited: usize,

    /// Integration deliveries that succeeded.
    pub delivered: usize,

    /// Integration deliveries that failed and were dropped.
    pub failed: usize,
}

/// Delivers committed facts to audit listeners and integration handlers.
pub struct EventDispatcher<S: EventStore> {
    audit: Vec<Arc<dyn AuditListener>>,
    handlers: Vec<Arc<dyn IntegrationHandler>>,
    translator: IntegrationTranslator<S>,
}

impl<S: EventStore> EventDispatcher<S> {
    /// Creates a dispatcher that reads creation facts from `store`.
    pub fn new(store: S) -> Self {
        Self {
            audit: Vec::new(),
            handlers: Vec::new(),
            translator: IntegrationTranslator::new(store),
        }
    }

    /// Registers a tier-1 audit listener.
    pub fn with_audit(mut self, listener: Arc<dyn AuditListener>) -> Self {
        self.audit.push(listener);
        self
    }

    /// Registers a tier-2 integration handler.
    pub fn with_handler(mut self, handler: Arc<dyn IntegrationHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn audit_count(&self) -> usize {
        self.audit.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatches a committed batch through both tiers.
    #[tracing::instrument(skip(self, committed), fields(facts = committed.len()))]
    pub async fn dispatch(&self, committed: &Committed) -> Result<DispatchReport> {
        let audited = self.dispatch_audit(committed.events()).await?;
        let (delivered, failed) = self.dispatch_integration(committed.events()).await;

        Ok(DispatchReport {
            audited,
            delivered,
            failed,
        })
    }

    /// Runs every audit listener over `events`, stopping at the first failure.
    pub async fn dispatch_audit(&self, events: &[EventEnvelope]) -> Result<usize> {
        for event in events {
            for listener in &self.audit {
                if let Err(err) = listener.record(event).await {
                    tracing::error!(
                        listener = listener.name(),
                        event_type = %event.event_type,
                        aggregate_id = %event.aggregate_id,
                        sequence = event.sequence,
                        error = %err,
                        "audit listener failed"
                    );
                    return Err(ProjectionError::Audit {
                        listener: listener.name(),
                        event_type: event.event_type.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(events.len())
    }

    /// Translates and delivers `events` to every integration handler.
    ///
    /// Returns the number of successful and failed deliveries.
    pub async fn dispatch_integration(&self, events: &[EventEnvelope]) -> (usize, usize) {
        let mut delivered = 0;
        let mut failed = 0;

        for event in events {
            let integration = match self.translator.translate(event).await {
                Ok(Some(integration)) => integration,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        event_type = %event.event_type,
                        aggregate_id = %event.aggregate_id,
                        error = %err,
                        "could not translate fact"
                    );
                    metrics::counter!("integration_dispatch_failures_total", "handler" => "translator")
                        .increment(1);
                    failed += self.handlers.len();
                    continue;
                }
            };

            for handler in &self.handlers {
                match handler.handle(&integration).await {
                    Ok(()) => delivered += 1,
                    Err(err) => {
                        tracing::warn!(
                            handler = handler.name(),
                            event = integration.name(),
                            source_id = %integration.source().source_id,
                            source_version = %integration.source().source_version,
                            error = %err,
                            "integration handler failed"
                        );
                        metrics::counter!("integration_dispatch_failures_total", "handler" => handler.name())
                            .increment(1);
                        failed += 1;
                    }
                }
            }
        }

        (delivered, failed)
    }
}
