//! Redelivery guard for integration handlers.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Result;
use crate::integration::{IdempotencyKey, IntegrationEvent, IntegrationHandler};

/// Wraps a handler so each (source, fact type, source version) is handled
/// at most once.
///
/// A key is claimed before the inner handler runs, so a concurrent
/// redelivery of the same fact is dropped. A failed delivery releases its
/// claim and is retried on the next redelivery.
pub struct IdempotentHandler<H> {
    inner: H,
    handled: RwLock<HashSet<IdempotencyKey>>,
}

impl<H: IntegrationHandler> IdempotentHandler<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            handled: RwLock::new(HashSet::new()),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    pub async fn has_handled(&self, key: &IdempotencyKey) -> bool {
        self.handled.read().await.contains(key)
    }
}

#[async_trait]
impl<H: IntegrationHandler> IntegrationHandler for IdempotentHandler<H> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<()> {
        let key = event.idempotency_key();
        if !self.handled.write().await.insert(key.clone()) {
            tracing::debug!(
                handler = self.inner.name(),
                source_id = %key.source_id,
                fact_type = %key.fact_type,
                "duplicate delivery dropped"
            );
            return Ok(());
        }

        if let Err(err) = self.inner.handle(event).await {
            self.handled.write().await.remove(&key);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProjectionError;
    use crate::integration::{EventSource, TimeOffChanged};
    use chrono::{Duration, TimeZone, Utc};
    use common::{Actor, AggregateId, TimeRange, TrainerId};
    use domain::TimeOffStatus;
    use event_store::Version;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Flaky {
        calls: AtomicUsize,
        fail_first: bool,
        slow: bool,
    }

    #[async_trait]
    impl IntegrationHandler for Flaky {
        fn name(&self) -> &'static str {
            "Flaky"
        }

        async fn handle(&self, _event: &IntegrationEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.slow {
                tokio::task::yield_now().await;
            }
            if self.fail_first && call == 0 {
                return Err(ProjectionError::Projection("timeout".to_string()));
            }
            Ok(())
        }
    }

    fn time_off(version: i64) -> IntegrationEvent {
        let at = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        IntegrationEvent::TimeOffChanged(TimeOffChanged {
            source: EventSource {
                source_id: AggregateId::from_uuid(uuid::Uuid::nil()),
                source_version: Version::new(version),
                sequence: version,
                fact_type: "TimeOffRegistered".to_string(),
                occurred_at: at,
            },
            actor: Actor::system("test"),
            previous: None,
            new: TimeOffStatus::Active,
            trainer_id: TrainerId::new(),
            window: TimeRange::starting_at(at, Duration::days(2)).unwrap(),
            reason: None,
        })
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_dropped() {
        let handler = IdempotentHandler::new(Flaky::default());

        handler.handle(&time_off(1)).await.unwrap();
        handler.handle(&time_off(1)).await.unwrap();
        handler.handle(&time_off(2)).await.unwrap();

        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried() {
        let handler = IdempotentHandler::new(Flaky {
            fail_first: true,
            ..Default::default()
        });

        assert!(handler.handle(&time_off(1)).await.is_err());
        assert!(!handler.has_handled(&time_off(1).idempotency_key()).await);

        handler.handle(&time_off(1)).await.unwrap();
        assert!(handler.has_handled(&time_off(1).idempotency_key()).await);
        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_redelivery_runs_once() {
        let handler = IdempotentHandler::new(Flaky {
            slow: true,
            ..Default::default()
        });
        let event = time_off(1);

        let (first, second) = tokio::join!(handler.handle(&event), handler.handle(&event));

        assert!(first.is_ok() && second.is_ok());
        assert_eq!(handler.inner().calls.load(Ordering::SeqCst), 1);
        assert!(handler.has_handled(&event.idempotency_key()).await);
    }
}
