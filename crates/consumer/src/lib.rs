//! Ingestion consumer: moves orders from the durable queue into storage.
//!
//! Every message goes `Received → Decoded → Validated → Persisted →
//! Acknowledged`, or ends in a failure whose kind decides how it is settled:
//!
//! - a payload that cannot be decoded or validated is logged and acknowledged
//!   (a poison message must never block the subject);
//! - a storage outage leaves the message unacknowledged for redelivery and
//!   backs off before the next pull;
//! - with a delivery budget configured, a message that keeps failing is moved
//!   to the dead-letter subject.
//!
//! Storage writes are idempotent upserts, so a redelivered message ends in the
//! same state as a single delivery.

use std::sync::Arc;
use std::time::Duration;

use queue::{DurableQueue, QueueError, QueueMessage};
use repository::{OrdersRepository, RepositoryError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod backoff;
mod metrics;

pub use backoff::Backoff;
pub use metrics::ConsumerMetrics;

/// Tuning of [`OrderConsumer`].
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Subject carrying order payloads.
    pub subject: String,
    /// Where messages go once `max_deliveries` is exhausted.
    pub dead_letter_subject: String,
    /// Bounded wait of a single pull; an empty window just re-polls.
    pub poll_interval: Duration,
    pub backoff: Backoff,
    /// Deliveries before dead-lettering; 0 keeps redelivering forever.
    pub max_deliveries: u32,
    /// Consecutive subscribe/poll failures before [`OrderConsumer::run`] gives up.
    pub max_subscribe_failures: u32,
}

/// How a single pull ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Stored and acknowledged.
    Persisted(String),
    /// Unprocessable payload, acknowledged and discarded.
    Dropped,
    /// Storage failed; left for redelivery.
    Retrying,
    /// Delivery budget exhausted; moved to the dead-letter subject.
    DeadLettered,
    /// Nothing arrived within the poll window.
    Idle,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Persisted(_) => "persisted",
            Outcome::Dropped => "dropped",
            Outcome::Retrying => "retrying",
            Outcome::DeadLettered => "dead_lettered",
            Outcome::Idle => "idle",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The order subject stayed unreachable for the whole failure budget.
    #[error("Subscription failed {attempts} times in a row: {source}")]
    SubscribeExhausted {
        attempts: u32,
        #[source]
        source: QueueError,
    },
}

/// OrderConsumer pulls order messages and upserts them through the repository.
pub struct OrderConsumer<Q, R> {
    queue: Arc<Q>,
    orders_repo: Arc<R>,
    settings: ConsumerSettings,
    metrics: Option<ConsumerMetrics>,
}

impl<Q, R> OrderConsumer<Q, R>
where
    Q: DurableQueue + 'static,
    R: OrdersRepository + 'static,
{
    pub fn new(queue: Arc<Q>, orders_repo: Arc<R>, settings: ConsumerSettings) -> Self {
        Self {
            queue,
            orders_repo,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ConsumerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs the consumption loop until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between messages: a message already
    /// pulled is persisted and acknowledged (or released) before returning.
    ///
    /// # Errors
    /// [`ConsumerError::SubscribeExhausted`] once subscribing or polling has
    /// failed `max_subscribe_failures` times in a row.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        let subject = self.settings.subject.as_str();
        let mut link_failures = 0u32;
        let mut storage_failures = 0u32;

        'subscribe: while !shutdown.is_cancelled() {
            let mut subscription = match self.queue.subscribe(subject).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    link_failures = self.link_failed(link_failures, e)?;
                    self.pause(&shutdown, self.settings.backoff.delay(link_failures)).await;
                    continue;
                }
            };
            info!(%subject, "Order consumer subscribed");

            loop {
                let pulled = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break 'subscribe,
                    pulled = subscription.next(self.settings.poll_interval) => pulled,
                };

                let outcome = match pulled {
                    Ok(Some(msg)) => {
                        link_failures = 0;
                        self.handle(msg).await
                    }
                    Ok(None) => {
                        link_failures = 0;
                        debug!(%subject, "No new messages, waiting...");
                        Outcome::Idle
                    }
                    Err(e) => {
                        link_failures = self.link_failed(link_failures, e)?;
                        self.pause(&shutdown, self.settings.backoff.delay(link_failures)).await;
                        continue 'subscribe;
                    }
                };

                match outcome {
                    Outcome::Retrying => {
                        storage_failures += 1;
                        let delay = self.settings.backoff.delay(storage_failures);
                        debug!(?delay, storage_failures, "Backing off before next pull");
                        self.pause(&shutdown, delay).await;
                    }
                    Outcome::Idle => {}
                    _ => storage_failures = 0,
                }
            }
        }

        info!(%subject, "Order consumer stopped");
        Ok(())
    }

    /// Processes one delivered message and settles it with the queue.
    pub async fn handle(&self, msg: QueueMessage) -> Outcome {
        let outcome = self.process(&msg).await;
        if let Some(metrics) = &self.metrics {
            metrics.record(&outcome);
        }
        outcome
    }

    async fn process(&self, msg: &QueueMessage) -> Outcome {
        let attempt = msg.delivery_attempt();

        let order = match model::decode(msg.payload()) {
            Ok(order) => order,
            Err(e) => {
                warn!(attempt, "Dropping undecodable order message: {e}");
                settle_ack(msg).await;
                return Outcome::Dropped;
            }
        };
        let order_uid = order.order_uid.clone();

        match self.orders_repo.upsert(&order).await {
            Ok(()) => {
                settle_ack(msg).await;
                info!(%order_uid, attempt, "Order processed");
                Outcome::Persisted(order_uid)
            }
            Err(RepositoryError::ConstraintViolation(e)) => {
                warn!(%order_uid, "Dropping order rejected by storage: {e}");
                settle_ack(msg).await;
                Outcome::Dropped
            }
            Err(e) => {
                error!(%order_uid, attempt, "Failed to save order: {e}");
                self.release(msg, &order_uid).await
            }
        }
    }

    /// Leaves a message for redelivery, or dead-letters it once the budget is spent.
    async fn release(&self, msg: &QueueMessage, order_uid: &str) -> Outcome {
        let budget = self.settings.max_deliveries;
        if budget > 0 && msg.delivery_attempt() >= budget {
            let dlq = self.settings.dead_letter_subject.as_str();
            match self.queue.publish(dlq, msg.payload()).await {
                Ok(()) => {
                    warn!(%order_uid, %dlq, "Order moved to dead-letter subject");
                    settle_ack(msg).await;
                    return Outcome::DeadLettered;
                }
                Err(e) => error!(%order_uid, %dlq, "Failed to dead-letter order: {e}"),
            }
        }

        if let Err(e) = msg.nack().await {
            // The rewind failed; the message comes back on the next subscription instead.
            error!(%order_uid, "Failed to release order message: {e}");
        }
        Outcome::Retrying
    }

    fn link_failed(&self, failures: u32, err: QueueError) -> Result<u32, ConsumerError> {
        let failures = failures + 1;
        error!(failures, "Order subscription failed: {err}");
        if failures >= self.settings.max_subscribe_failures {
            return Err(ConsumerError::SubscribeExhausted {
                attempts: failures,
                source: err,
            });
        }
        Ok(failures)
    }

    async fn pause(&self, shutdown: &CancellationToken, delay: Duration) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// A failed ack only means the message will be seen again, which the upsert absorbs.
async fn settle_ack(msg: &QueueMessage) {
    if let Err(e) = msg.ack().await {
        error!(subject = msg.subject(), "Failed to acknowledge message: {e}");
    }
}
