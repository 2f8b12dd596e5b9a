//! PostgreSQL booking history tests
//!
//! Run with:
//!
//! ```bash
//! cargo test -p projections --test postgres_history -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use common::{Actor, AggregateId, TimeRange, TrainerId, UserId};
use domain::{
    Booking, BookingStatus, BookingType, CancellationClass, NewBooking, ReservationTier,
    SlotContext, UnitOfWork,
};
use event_store::PostgresEventStore;
use projections::{AuditListener, EventDispatcher, PostgresBookingHistory};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_events_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/002_create_booking_history.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events, relay_checkpoints, booking_history RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

#[tokio::test]
async fn history_rows_survive_round_trip_and_replay() {
    let pool = get_test_pool().await;
    let store = PostgresEventStore::new(pool.clone());
    let history = PostgresBookingHistory::new(pool);
    let dispatcher = EventDispatcher::new(store.clone()).with_audit(Arc::new(history.clone()));

    let now = Utc.with_ymd_and_hms(2026, 4, 6, 9, 0, 0).unwrap();
    let booking_id = AggregateId::new();
    let user_id = UserId::new();
    let mut booking = Booking::default();

    let created = booking
        .create(
            NewBooking {
                booking_id,
                schedule_id: AggregateId::new(),
                user_id,
                booking_type: BookingType::Personal,
                tier: ReservationTier::ApprovalRequired,
                ticket_id: None,
                slot: SlotContext {
                    trainer_id: TrainerId::new(),
                    window: TimeRange::starting_at(now + Duration::days(4), Duration::hours(1))
                        .unwrap(),
                    title: "PT session".to_string(),
                },
                group_id: None,
            },
            Actor::Member(user_id),
            now,
        )
        .unwrap();
    let mut unit = UnitOfWork::new(now);
    unit.record(booking_id, &mut booking, created).unwrap();
    let first = unit.commit(&store).await.unwrap();
    dispatcher.dispatch(&first).await.unwrap();

    let later = now + Duration::hours(1);
    let cancelled = booking
        .cancel(Actor::Member(user_id), Some("travel".to_string()), later)
        .unwrap();
    let mut unit = UnitOfWork::new(later);
    unit.record(booking_id, &mut booking, cancelled).unwrap();
    let second = unit.commit(&store).await.unwrap();
    dispatcher.dispatch(&second).await.unwrap();

    // Replaying a fact writes nothing new
    history.record(&second.events()[0]).await.unwrap();

    let trail = history.history(booking_id).await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].previous_status, None);
    assert_eq!(trail[0].new_status, BookingStatus::Pending);
    assert_eq!(trail[1].previous_status, Some(BookingStatus::Pending));
    assert_eq!(trail[1].new_status, BookingStatus::Cancelled);
    assert_eq!(trail[1].classification, Some(CancellationClass::FreeCancel));
    assert_eq!(trail[1].reason.as_deref(), Some("travel"));
    assert_eq!(trail[1].actor, Actor::Member(user_id));
}
