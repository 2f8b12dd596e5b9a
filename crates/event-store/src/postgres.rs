use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventQuery, EventStoreError, Result, Version,
    store::{EventStore, EventStream, StreamAppend, validate_streams_for_append},
};

/// Transaction-scoped advisory lock held by every append.
///
/// Appends run one at a time, so `sequence` values become visible in commit
/// order and a reader past sequence N never meets a later commit below N.
pub const APPEND_LOCK_KEY: i64 = 0x5245_5345_5256;

const SELECT_COLUMNS: &str =
    "SELECT id, event_type, aggregate_id, aggregate_type, version, sequence, timestamp, payload FROM events";

/// PostgreSQL-backed event store implementation.
///
/// The `unique_aggregate_version` constraint on `(aggregate_id, version)` is
/// the compare-and-swap guard: of two writers that observed the same version,
/// exactly one insert succeeds.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            sequence: row.try_get("sequence")?,
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, streams), fields(streams = streams.len()))]
    async fn append_streams(&self, streams: Vec<StreamAppend>) -> Result<Vec<EventEnvelope>> {
        validate_streams_for_append(&streams)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        let mut committed = Vec::new();

        for stream in streams {
            let aggregate_id = stream.events[0].aggregate_id;

            if let Some(expected) = stream.options.expected_version {
                let current_version: Option<i64> =
                    sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                        .bind(aggregate_id.as_uuid())
                        .fetch_one(&mut *tx)
                        .await?;

                let actual = Version::new(current_version.unwrap_or(0));
                if actual != expected {
                    metrics::counter!("event_store_conflicts_total").increment(1);
                    return Err(EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected,
                        actual,
                    });
                }
            }

            for mut event in stream.events {
                let sequence: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING sequence
                    "#,
                )
                .bind(event.event_id.as_uuid())
                .bind(&event.event_type)
                .bind(event.aggregate_id.as_uuid())
                .bind(&event.aggregate_type)
                .bind(event.version.as_i64())
                .bind(event.timestamp)
                .bind(&event.payload)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    // A concurrent writer took this version first
                    if let sqlx::Error::Database(ref db_err) = e
                        && db_err.constraint() == Some("unique_aggregate_version")
                    {
                        metrics::counter!("event_store_conflicts_total").increment(1);
                        return EventStoreError::ConcurrencyConflict {
                            aggregate_id,
                            expected: stream.options.expected_version.unwrap_or(Version::initial()),
                            actual: event.version,
                        };
                    }
                    EventStoreError::Database(e)
                })?;

                event.sequence = sequence;
                committed.push(event);
            }
        }

        tx.commit().await?;
        Ok(committed)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE aggregate_id = $1 ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut sql = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        sql.push(" WHERE sequence > ").push_bind(query.after_sequence);
        if let Some(id) = query.stream {
            sql.push(" AND aggregate_id = ").push_bind(id.as_uuid());
        }
        if let Some(aggregate_type) = query.aggregate_type {
            sql.push(" AND aggregate_type = ").push_bind(aggregate_type);
        }
        if !query.fact_types.is_empty() {
            sql.push(" AND event_type = ANY(").push_bind(query.fact_types).push(")");
        }
        sql.push(" ORDER BY sequence ASC");
        if let Some(limit) = query.limit {
            sql.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = sql.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY sequence ASC"))
            .fetch_all(&self.pool)
            .await?;

        let events: Vec<Result<EventEnvelope>> =
            rows.into_iter().map(Self::row_to_event).collect();
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    async fn load_checkpoint(&self, consumer: &str) -> Result<Option<i64>> {
        let sequence: Option<i64> =
            sqlx::query_scalar("SELECT sequence FROM relay_checkpoints WHERE consumer = $1")
                .bind(consumer)
                .fetch_optional(&self.pool)
                .await?;
        Ok(sequence)
    }

    async fn save_checkpoint(&self, consumer: &str, sequence: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO relay_checkpoints (consumer, sequence, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (consumer) DO UPDATE SET
                sequence = EXCLUDED.sequence,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(consumer)
        .bind(sequence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
