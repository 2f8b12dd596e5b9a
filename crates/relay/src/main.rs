//! Relay entry point.

use std::sync::Arc;

use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{AuditListener, BookingHistoryView, PostgresBookingHistory};
use relay::config::Config;
use relay::error::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Runs the polling relay and the HTTP server until shutdown.
async fn serve<S: EventStore + Clone + 'static>(
    config: Config,
    store: S,
    audit: Arc<dyn AuditListener>,
    metrics_handle: PrometheusHandle,
) -> Result<()> {
    let state = relay::create_state(store, audit, &config);
    let (stop_tx, stop_rx) = watch::channel(false);

    let worker = {
        let relay = state.relay.clone();
        let poll_interval = config.poll_interval();
        tokio::spawn(async move { relay.run(poll_interval, stop_rx).await })
    };

    let app = relay::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, consumer = %config.consumer, "starting relay server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_tx.send(true);
    if let Err(err) = worker.await {
        tracing::error!(error = %err, "relay worker panicked");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store; history goes to the same database when there is one
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
            let store = PostgresEventStore::new(pool.clone());
            store.run_migrations().await?;
            let history = Arc::new(PostgresBookingHistory::new(pool));
            serve(config, store, history, metrics_handle).await?;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, relaying from an empty in-memory store");
            let history = Arc::new(BookingHistoryView::new());
            serve(config, InMemoryEventStore::new(), history, metrics_handle).await?;
        }
    }

    tracing::info!("relay shut down gracefully");
    Ok(())
}
