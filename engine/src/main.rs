//! Neighborly counter and reservation engine.
//!
//! Connects the cache, the durable store and the broker, runs counter
//! reconciliation for the lifetime of the process and, when configured,
//! one reservation consumer window.

use neighborly_core::environment::SystemClock;
use neighborly_engine::metrics::MetricsServer;
use neighborly_engine::{Config, CounterEngine, KeySpace, ReservationScheduler};
use neighborly_postgres::{PoolSettings, PostgresDurableStore};
use neighborly_redis::RedisCacheStore;
use neighborly_redpanda::RedpandaBroker;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "neighborly=info,neighborly_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Neighborly engine");

    let config = Config::from_env();
    info!(
        redis_url = %config.redis.url,
        postgres_url = %config.postgres.url,
        redpanda_brokers = %config.redpanda.brokers,
        queue = %config.redpanda.reservation_queue,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr {
        let mut metrics = MetricsServer::new(addr);
        metrics.start()?;
    }

    info!("Connecting to Redis...");
    let cache = Arc::new(RedisCacheStore::new(&config.redis.url).await?);

    info!("Connecting to PostgreSQL...");
    let settings = PoolSettings {
        max_connections: config.postgres.max_connections,
        min_connections: config.postgres.min_connections,
        connect_timeout: config.postgres.connect_timeout(),
    };
    let durable = Arc::new(PostgresDurableStore::connect(&config.postgres.url, &settings).await?);
    durable.migrate().await?;
    info!("Durable store ready");

    info!("Connecting to Redpanda...");
    let broker = Arc::new(
        RedpandaBroker::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .producer_acks(&config.redpanda.producer_acks)
            // Committed but unread payloads are dropped when a window closes
            .buffer_size(1)
            .build()?,
    );

    let keys = KeySpace::new(&config.redis.key_prefix);
    let counters = CounterEngine::new(
        Arc::clone(&cache),
        keys,
        config.counters.full_projection_ttl(),
    );
    let reconciler = counters.spawn_reconciler(
        Arc::clone(&durable),
        config.counters.reconcile_interval(),
        config.counters.reconcile_batch_size,
    );
    info!(
        interval_secs = config.counters.reconcile_interval,
        "Counter reconciliation running"
    );

    let window = match config.reservation_window {
        Some(window) => {
            let scheduler = ReservationScheduler::new(
                Arc::clone(&durable),
                broker,
                Arc::new(SystemClock),
                &config.redpanda.reservation_queue,
            );
            match scheduler.schedule(window.begin, window.end) {
                Ok(window) => Some(window),
                Err(e) => {
                    warn!(error = %e, "Configured reservation window not scheduled");
                    None
                }
            }
        }
        None => None,
    };

    shutdown_signal().await;
    info!("Shutdown signal received");

    reconciler.abort();
    if let Some(window) = window {
        if window.is_finished() {
            match window.join().await {
                Ok(report) => info!(drained = report.drained(), "Reservation window report"),
                Err(e) => error!(error = %e, "Reservation window failed"),
            }
        } else {
            warn!(end = %window.end(), "Exiting before the reservation window closed");
        }
    }

    info!("Neighborly engine stopped");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
