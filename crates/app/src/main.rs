//! Order ingestion service.
//!
//! Orders submitted over HTTP are appended to a durable Kafka subject; a
//! background consumer decodes, validates and upserts them into PostgreSQL,
//! from where the query endpoints read them back.
//!
//! Every dependency is connected before anything is served: an unreachable
//! database or broker aborts startup. On Ctrl+C or SIGTERM the server stops
//! accepting requests, the consumer finishes the message it holds, and the
//! process exits within `shutdown_timeout`.
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use app_config::AppConfig;
use consumer::{Backoff, ConsumerMetrics, ConsumerSettings, OrderConsumer};
use prometheus::Registry;
use queue::{KafkaQueue, KafkaSettings};
use repository::PgOrdersRepository;
use server::Server;
use service::{MessageServiceImpl, OrderServiceImpl};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for logging; `RUST_LOG` overrides the `info` default.
fn init_logger() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    info!("Order service starting...");

    let config = AppConfig::load().context("Failed to load configuration")?;

    let db_pool = db::init_db_pool(&config)
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized successfully");
    let orders_repo = Arc::new(PgOrdersRepository::new(db_pool));

    let queue = Arc::new(
        KafkaQueue::connect(
            KafkaSettings {
                brokers: config.kafka_brokers.clone(),
                group_prefix: config.kafka_group_prefix.clone(),
                publish_timeout: config.publish_timeout,
            },
            &[
                config.generic_subject.as_str(),
                config.orders_subject.as_str(),
                config.dead_letter_subject.as_str(),
            ],
        )
        .await
        .context("Failed to connect to Kafka")?,
    );
    info!(brokers = ?config.kafka_brokers, "Kafka connected");

    let registry = Registry::new();
    let consumer_metrics =
        ConsumerMetrics::register(&registry).context("Failed to register consumer metrics")?;

    let order_service = Arc::new(OrderServiceImpl::new(
        queue.clone(),
        orders_repo.clone(),
        config.orders_subject.clone(),
    ));
    let message_service = Arc::new(MessageServiceImpl::new(
        queue.clone(),
        config.generic_subject.clone(),
        config.read_timeout,
    ));
    let order_consumer = OrderConsumer::new(
        queue,
        orders_repo,
        ConsumerSettings {
            subject: config.orders_subject.clone(),
            dead_letter_subject: config.dead_letter_subject.clone(),
            poll_interval: config.poll_interval,
            backoff: Backoff::new(config.backoff_initial, config.backoff_max),
            max_deliveries: config.max_deliveries,
            max_subscribe_failures: config.max_subscribe_failures,
        },
    )
    .with_metrics(consumer_metrics);
    let http_server = Server::new(config.http_port, order_service, message_service, registry)?;

    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let consumer_shutdown = shutdown.clone();
    tasks.spawn(async move {
        order_consumer
            .run(consumer_shutdown)
            .await
            .context("Order consumer failed")
    });

    let server_shutdown = shutdown.clone();
    tasks.spawn(async move { http_server.start(server_shutdown).await });

    // The first task to finish decides: a clean exit only happens after a signal.
    let outcome = tokio::select! {
        _ = shutdown_signal() => Ok(()),
        Some(res) = tasks.join_next() => match res {
            Ok(Ok(())) => Err(anyhow!("A service task stopped unexpectedly")),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(anyhow!("Task panicked: {e}")),
        },
    };
    if let Err(e) = &outcome {
        error!("{e:#}");
    }

    shutdown.cancel();
    let drained = tokio::time::timeout(config.shutdown_timeout, async {
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(Err(e)) => error!("Task error during shutdown: {e:#}"),
                Err(e) => error!("Task error: {e}"),
                Ok(Ok(())) => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(timeout = ?config.shutdown_timeout, "Shutdown timed out, aborting remaining tasks");
        tasks.abort_all();
    }

    info!("Application stopped");
    outcome
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
