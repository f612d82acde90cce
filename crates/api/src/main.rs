//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::Config;
use domain::{EveryNthPrimary, OrderService};
use relay::{KafkaBus, OutboxRelay, RelayConfig};
use sqlx::postgres::PgPoolOptions;
use storage::PgStore;
use tokio::signal;
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

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect the master/replica pools and run migrations
    let master = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to the master database");
    let replica = PgPoolOptions::new()
        .max_connections(10)
        .connect(config.replica_url())
        .await
        .expect("failed to connect to the replica database");

    let store = PgStore::new(master, replica, &config.topic);
    store.run_migrations().await.expect("migrations failed");

    // 4. Start the outbox relay before taking traffic
    let bus = KafkaBus::new(&config.kafka_brokers).expect("failed to create Kafka producer");
    let relay = OutboxRelay::new(
        store.clone(),
        bus,
        RelayConfig {
            poll_interval: config.poll_interval(),
            requeue_after: config.requeue_after(),
        },
    );
    let relay_handle = relay.spawn();

    // 5. Build the application
    let orders = OrderService::new(
        store,
        Arc::new(EveryNthPrimary::new(config.primary_read_every)),
    );
    let state = Arc::new(AppState { orders });
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Let the relay finish its in-flight drain before exiting
    relay_handle.stop().await;

    tracing::info!("server shut down gracefully");
}
