//! Booking history persisted to PostgreSQL.

use async_trait::async_trait;
use common::{Actor, AggregateId};
use event_store::{EventEnvelope, EventId, Version};
use serde::de::DeserializeOwned;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{AuditListener, BookingHistoryRecord};
use crate::Result;

/// Writes booking history rows to the `booking_history` table.
///
/// Rows are keyed by fact id, so a replayed fact is a no-op.
#[derive(Clone)]
pub struct PostgresBookingHistory {
    pool: PgPool,
}

impl PostgresBookingHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts one row unless it is already present. Returns true if written.
    pub async fn insert(&self, record: &BookingHistoryRecord) -> Result<bool> {
        let actor = serde_json::to_value(&record.actor)?;
        let result = sqlx::query(
            r#"
            INSERT INTO booking_history
                (event_id, booking_id, version, previous_status, new_status,
                 actor, reason, classification, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(record.event_id.as_uuid())
        .bind(record.booking_id.as_uuid())
        .bind(record.version.as_i64())
        .bind(record.previous_status.map(|s| s.as_str()))
        .bind(record.new_status.as_str())
        .bind(actor)
        .bind(record.reason.as_deref())
        .bind(record.classification.map(|c| c.as_str()))
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns the trail of one booking in version order.
    pub async fn history(&self, booking_id: AggregateId) -> Result<Vec<BookingHistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, booking_id, version, previous_status, new_status,
                   actor, reason, classification, recorded_at
            FROM booking_history
            WHERE booking_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(booking_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    fn row_to_record(row: PgRow) -> Result<BookingHistoryRecord> {
        let previous: Option<String> = row.try_get("previous_status")?;
        let classification: Option<String> = row.try_get("classification")?;
        let actor: serde_json::Value = row.try_get("actor")?;

        Ok(BookingHistoryRecord {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            booking_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("booking_id")?),
            version: Version::new(row.try_get("version")?),
            previous_status: previous.map(parse_label).transpose()?,
            new_status: parse_label(row.try_get("new_status")?)?,
            actor: serde_json::from_value::<Actor>(actor)?,
            reason: row.try_get("reason")?,
            classification: classification.map(parse_label).transpose()?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

fn parse_label<T: DeserializeOwned>(label: String) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::String(label))?)
}

#[async_trait]
impl AuditListener for PostgresBookingHistory {
    fn name(&self) -> &'static str {
        "PostgresBookingHistory"
    }

    async fn record(&self, event: &EventEnvelope) -> Result<()> {
        if let Some(record) = BookingHistoryRecord::from_event(event)? {
            if !self.insert(&record).await? {
                tracing::debug!(event_id = %record.event_id, "history row already present");
            }
        }
        Ok(())
    }
}
