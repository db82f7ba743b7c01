//! Pipeline worker: consumes submission envelopes, stores tickets, watches
//! the dead-letter queue.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;
use waypost_core::clock::SystemClock;
use waypost_pipeline::{Config, TicketConsumer, TracingNotifier, builtin_registry, spawn_dlq_monitor};
use waypost_postgres::{PostgresDeadLetters, PostgresTicketRepository};
use waypost_redpanda::RedpandaBus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .idle_timeout(Duration::from_secs(config.postgres.idle_timeout))
        .connect(&config.postgres.url)
        .await
        .context("connecting to PostgreSQL")?;

    let repository = PostgresTicketRepository::new(pool.clone());
    repository.migrate().await.context("running migrations")?;

    let bus = RedpandaBus::builder()
        .brokers(&config.redpanda.brokers)
        .consumer_group(&config.redpanda.consumer_group)
        .session_timeout_ms(config.redpanda.session_timeout_ms)
        .max_poll_interval_ms(config.redpanda.max_poll_interval_ms)
        .build()
        .context("creating Redpanda bus")?;

    let registry = builtin_registry(
        Arc::new(repository),
        Arc::new(TracingNotifier::new()),
        Arc::new(SystemClock),
    );
    let dead_letters = Arc::new(PostgresDeadLetters::new(pool));

    let (shutdown_tx, _) = broadcast::channel(1);

    let consumer = TicketConsumer::builder()
        .name("waypost-worker")
        .topics(vec![config.redpanda.ticket_topic.clone()])
        .bus(Arc::new(bus))
        .registry(Arc::new(registry))
        .dead_letters(dead_letters.clone())
        .shutdown(shutdown_tx.subscribe())
        .max_attempts(config.pipeline.max_attempts)
        .retry_delay(Duration::from_secs(config.pipeline.retry_delay_secs))
        .build()
        .map_err(|e| anyhow::anyhow!(e))?;
    let consumer_handle = consumer.spawn();

    let monitor_handle = spawn_dlq_monitor(
        dead_letters,
        Duration::from_secs(config.pipeline.dlq_poll_interval_secs),
        shutdown_tx.subscribe(),
    );

    info!(
        topic = %config.redpanda.ticket_topic,
        max_attempts = config.pipeline.max_attempts,
        dlq_retention_days = config.pipeline.dlq_retention_days,
        "Worker running; ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    consumer_handle.await.context("joining consumer")?;
    monitor_handle.await.context("joining monitor")?;

    Ok(())
}
