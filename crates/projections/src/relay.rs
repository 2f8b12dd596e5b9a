//! Outbox relay: replays committed facts after a persisted checkpoint.
//!
//! A process can crash between a commit and its inline dispatch. The relay
//! reads the store in sequence order from the last checkpoint, dispatches
//! each batch and only then advances the checkpoint, so every fact is
//! delivered at least once.

use std::sync::Arc;
use std::time::Duration;

use domain::Committed;
use event_store::{EventQuery, EventStore};
use tokio::sync::watch;

use crate::Result;
use crate::dispatcher::EventDispatcher;

/// Polls the store and feeds unseen facts to a dispatcher.
pub struct OutboxRelay<S: EventStore> {
    store: S,
    dispatcher: Arc<EventDispatcher<S>>,
    consumer: String,
    batch_size: usize,
}

impl<S: EventStore> OutboxRelay<S> {
    pub fn new(
        store: S,
        dispatcher: Arc<EventDispatcher<S>>,
        consumer: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            consumer: consumer.into(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Returns the last sequence this consumer has dispatched.
    pub async fn checkpoint(&self) -> Result<i64> {
        Ok(self.store.load_checkpoint(&self.consumer).await?.unwrap_or(0))
    }

    /// Dispatches at most one batch. Returns the number of facts relayed.
    #[tracing::instrument(skip(self), fields(consumer = %self.consumer))]
    pub async fn run_once(&self) -> Result<usize> {
        let after = self.checkpoint().await?;
        let batch = self
            .store
            .query_events(EventQuery::after(after).limit(self.batch_size))
            .await?;

        let committed = Committed::from_stored(batch);
        let Some(last) = committed.last_sequence() else {
            return Ok(0);
        };

        let report = self.dispatcher.dispatch(&committed).await?;
        self.store.save_checkpoint(&self.consumer, last).await?;

        metrics::counter!("relay_events_delivered_total").increment(committed.len() as u64);
        tracing::debug!(
            from = after,
            to = last,
            delivered = report.delivered,
            failed = report.failed,
            "relayed batch"
        );

        Ok(committed.len())
    }

    /// Drains every pending batch. Returns the total number of facts relayed.
    pub async fn drain(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let relayed = self.run_once().await?;
            if relayed == 0 {
                return Ok(total);
            }
            total += relayed;
        }
    }

    /// Polls until `shutdown` flips to true.
    ///
    /// A failing batch is logged and retried on the next tick from the same
    /// checkpoint.
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(consumer = %self.consumer, ?poll_interval, "outbox relay started");

        loop {
            match self.drain().await {
                Ok(0) => {}
                Ok(relayed) => tracing::info!(relayed, "outbox relay caught up"),
                Err(err) => tracing::error!(error = %err, "outbox relay batch failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(consumer = %self.consumer, "outbox relay stopped");
    }
}
