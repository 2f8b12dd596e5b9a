use event_store::EventStore;
use futures_util::StreamExt;

use crate::Result;
use crate::projection::Projection;

/// Replays the store into registered projections, in sequence order.
///
/// A projection only receives facts past its own position, so catch-up can
/// run against views that already saw part of the log.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
        }
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Returns how many (fact, projection) deliveries were made.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<u64> {
        let mut stream = self.store.stream_all_events().await?;
        let mut delivered: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;

            for projection in &self.projections {
                if projection.position().await.has_seen(event.sequence) {
                    continue;
                }
                projection.handle(&event).await?;
                delivered += 1;
                metrics::counter!("projections_events_processed").increment(1);
            }
        }

        tracing::info!(delivered, "catch-up complete");

        Ok(delivered)
    }

    /// Resets every projection, then replays the whole log.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<u64> {
        for projection in &self.projections {
            projection.reset().await?;
        }
        self.run_catch_up().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionPosition;
    use async_trait::async_trait;
    use common::AggregateId;
    use event_store::{AppendOptions, EventEnvelope, EventStoreExt, InMemoryEventStore, Version};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct CountingProjection {
        count: Arc<RwLock<u64>>,
        position: Arc<RwLock<ProjectionPosition>>,
    }

    #[async_trait]
    impl Projection for CountingProjection {
        fn name(&self) -> &'static str {
            "CountingProjection"
        }

        async fn handle(&self, event: &EventEnvelope) -> Result<()> {
            *self.count.write().await += 1;
            let mut pos = self.position.write().await;
            *pos = pos.advance(event.sequence);
            Ok(())
        }

        async fn position(&self) -> ProjectionPosition {
            *self.position.read().await
        }

        async fn reset(&self) -> Result<()> {
            *self.count.write().await = 0;
            *self.position.write().await = ProjectionPosition::zero();
            Ok(())
        }
    }

    fn fact(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::new(
            aggregate_id,
            "Schedule",
            Version::new(version),
            "SeatReserved",
            serde_json::json!({"test": true}),
        )
    }

    async fn seeded_store(facts: i64) -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let events = (1..=facts).map(|v| fact(id, v)).collect();
        store.append(events, AppendOptions::new()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_catch_up_processes_all_facts() {
        let store = seeded_store(3).await;
        let projection = CountingProjection::default();
        let count = Arc::clone(&projection.count);

        let mut processor = ProjectionProcessor::new(store);
        processor.register(Box::new(projection));

        assert_eq!(processor.run_catch_up().await.unwrap(), 3);
        assert_eq!(*count.read().await, 3);
    }

    #[tokio::test]
    async fn test_catch_up_skips_seen_sequences() {
        let store = seeded_store(3).await;
        let projection = CountingProjection::default();
        let count = Arc::clone(&projection.count);

        let mut processor = ProjectionProcessor::new(store.clone());
        processor.register(Box::new(projection));
        processor.run_catch_up().await.unwrap();

        // Only the new fact is delivered on the second pass
        store
            .append(vec![fact(AggregateId::new(), 1)], AppendOptions::expect_new())
            .await
            .unwrap();
        assert_eq!(processor.run_catch_up().await.unwrap(), 1);
        assert_eq!(*count.read().await, 4);
    }

    #[tokio::test]
    async fn test_rebuild_resets_and_replays() {
        let store = seeded_store(2).await;
        let projection = CountingProjection::default();
        let count = Arc::clone(&projection.count);
        let position = Arc::clone(&projection.position);

        let mut processor = ProjectionProcessor::new(store);
        processor.register(Box::new(projection));

        processor.run_catch_up().await.unwrap();
        processor.rebuild_all().await.unwrap();

        assert_eq!(*count.read().await, 2);
        assert_eq!(position.read().await.events_processed, 2);
    }

    #[tokio::test]
    async fn test_multiple_projections() {
        let store = seeded_store(2).await;
        let first = CountingProjection::default();
        let second = CountingProjection::default();
        let c1 = Arc::clone(&first.count);
        let c2 = Arc::clone(&second.count);

        let mut processor = ProjectionProcessor::new(store);
        processor.register(Box::new(first));
        processor.register(Box::new(second));
        assert_eq!(processor.projection_count(), 2);

        processor.run_catch_up().await.unwrap();
        assert_eq!(*c1.read().await, 2);
        assert_eq!(*c2.read().await, 2);
    }
}
