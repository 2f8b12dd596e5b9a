//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use event_store::{
    AggregateId, AppendOptions, EventEnvelope, EventQuery, EventStore, EventStoreError,
    EventStoreExt, PostgresEventStore, StreamAppend, Version, postgres::APPEND_LOCK_KEY,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
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
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events, relay_checkpoints RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn fact(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
    EventEnvelope::new(
        aggregate_id,
        "Schedule",
        Version::new(version),
        event_type,
        serde_json::json!({"capacity": 3}),
    )
}

#[tokio::test]
async fn append_and_retrieve_events() {
    let store = get_test_store().await;
    let schedule = AggregateId::new();

    let version = store
        .append(
            vec![fact(schedule, 1, "ScheduleOpened"), fact(schedule, 2, "SeatReserved")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    assert_eq!(version, Version::new(2));

    let events = store.get_events_for_aggregate(schedule).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "ScheduleOpened");
    assert_eq!(events[1].version, Version::new(2));
    assert!(events[0].sequence < events[1].sequence);
}

#[tokio::test]
async fn stale_expected_version_is_rejected() {
    let store = get_test_store().await;
    let schedule = AggregateId::new();

    store
        .append(vec![fact(schedule, 1, "ScheduleOpened")], AppendOptions::expect_new())
        .await
        .unwrap();

    let result = store
        .append(
            vec![fact(schedule, 2, "SeatReserved")],
            AppendOptions::expect_version(Version::initial()),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
async fn unique_version_constraint_reports_conflict() {
    let store = get_test_store().await;
    let schedule = AggregateId::new();

    store
        .append(vec![fact(schedule, 1, "ScheduleOpened")], AppendOptions::new())
        .await
        .unwrap();

    // No expectation given, so only the unique constraint can catch it
    let err = store
        .append(vec![fact(schedule, 1, "SeatReserved")], AppendOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_conflict());
}

#[tokio::test]
async fn concurrent_writers_on_same_version_one_wins() {
    let store = get_test_store().await;
    let schedule = AggregateId::new();

    store
        .append(vec![fact(schedule, 1, "ScheduleOpened")], AppendOptions::expect_new())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .append(
                    vec![fact(schedule, 2, "SeatReserved")],
                    AppendOptions::expect_version(Version::first()),
                )
                .await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) if e.is_conflict() => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(
        store.get_aggregate_version(schedule).await.unwrap(),
        Some(Version::new(2))
    );
}

#[tokio::test]
async fn multi_stream_append_rolls_back_on_conflict() {
    let store = get_test_store().await;
    let booking = AggregateId::new();
    let schedule = AggregateId::new();

    store
        .append(vec![fact(schedule, 1, "ScheduleOpened")], AppendOptions::expect_new())
        .await
        .unwrap();

    let result = store
        .append_streams(vec![
            StreamAppend::new(
                vec![fact(booking, 1, "BookingCreated")],
                AppendOptions::expect_new(),
            ),
            StreamAppend::new(
                vec![fact(schedule, 1, "SeatReserved")],
                AppendOptions::expect_new(),
            ),
        ])
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { aggregate_id, .. }) if aggregate_id == schedule
    ));
    assert!(!store.aggregate_exists(booking).await.unwrap());
}

#[tokio::test]
async fn multi_stream_append_returns_sequences() {
    let store = get_test_store().await;
    let booking = AggregateId::new();
    let schedule = AggregateId::new();

    let committed = store
        .append_streams(vec![
            StreamAppend::new(
                vec![fact(booking, 1, "BookingCreated")],
                AppendOptions::expect_new(),
            ),
            StreamAppend::new(
                vec![fact(schedule, 1, "ScheduleOpened"), fact(schedule, 2, "SeatReserved")],
                AppendOptions::expect_new(),
            ),
        ])
        .await
        .unwrap();

    assert_eq!(committed.len(), 3);
    assert!(committed.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[tokio::test]
async fn query_after_sequence_by_type() {
    let store = get_test_store().await;
    let a = AggregateId::new();
    let b = AggregateId::new();

    store
        .append(vec![fact(a, 1, "BookingCreated")], AppendOptions::new())
        .await
        .unwrap();
    store
        .append(vec![fact(b, 1, "BookingCreated")], AppendOptions::new())
        .await
        .unwrap();
    store
        .append(vec![fact(b, 2, "BookingCancelled")], AppendOptions::new())
        .await
        .unwrap();

    let first = store
        .query_events(EventQuery::new().limit(1))
        .await
        .unwrap();
    let after_first = store
        .query_events(EventQuery::after(first[0].sequence).event_type("BookingCreated"))
        .await
        .unwrap();

    assert_eq!(after_first.len(), 1);
    assert_eq!(after_first[0].aggregate_id, b);
}

#[tokio::test]
async fn checkpoint_upsert() {
    let store = get_test_store().await;

    assert_eq!(store.load_checkpoint("relay").await.unwrap(), None);
    store.save_checkpoint("relay", 7).await.unwrap();
    store.save_checkpoint("relay", 12).await.unwrap();
    assert_eq!(store.load_checkpoint("relay").await.unwrap(), Some(12));
}

#[tokio::test]
async fn stream_all_events() {
    use futures_util::StreamExt;

    let store = get_test_store().await;

    store
        .append(
            vec![fact(AggregateId::new(), 1, "Event1")],
            AppendOptions::new(),
        )
        .await
        .unwrap();
    store
        .append(
            vec![fact(AggregateId::new(), 1, "Event2")],
            AppendOptions::new(),
        )
        .await
        .unwrap();

    let stream = store.stream_all_events().await.unwrap();
    let events: Vec<_> = stream.collect().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.is_ok()));
}

#[tokio::test]
async fn appends_become_visible_in_sequence_order() {
    let store = get_test_store().await;

    // An earlier writer is mid-transaction and holds the append lock.
    let mut early = store.pool().begin().await.unwrap();
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(APPEND_LOCK_KEY)
        .execute(&mut *early)
        .await
        .unwrap();

    let late_store = store.clone();
    let late = tokio::spawn(async move {
        late_store
            .append_streams(vec![StreamAppend::new(
                vec![fact(AggregateId::new(), 1, "Late")],
                AppendOptions::new(),
            )])
            .await
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!late.is_finished(), "second append must wait for the first");

    let early_sequence: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, payload)
        VALUES ($1, 'Early', $2, 'Schedule', 1, '{}'::jsonb)
        RETURNING sequence
        "#,
    )
    .bind(uuid::Uuid::new_v4())
    .bind(AggregateId::new().as_uuid())
    .fetch_one(&mut *early)
    .await
    .unwrap();

    // Uncommitted facts stay invisible to a relay.
    let relayed = store.query_events(EventQuery::new()).await.unwrap();
    assert!(relayed.is_empty());
    early.commit().await.unwrap();

    let late = late.await.unwrap().unwrap();
    assert!(late[0].sequence > early_sequence);

    let checkpoint = early_sequence;
    let after_checkpoint = store
        .query_events(EventQuery::after(checkpoint))
        .await
        .unwrap();
    assert_eq!(after_checkpoint.len(), 1);
    assert_eq!(after_checkpoint[0].event_type, "Late");

    let all: Vec<String> = store
        .query_events(EventQuery::new())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(all, vec!["Early".to_string(), "Late".to_string()]);
}
