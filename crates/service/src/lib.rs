//! Business logic layer for order submission and lookup.
//!
//! This module defines the [`OrderService`] trait and its implementation
//! [`OrderServiceImpl`], plus the free-form message surface [`MessageService`].
//!
//! # Features
//! - Submission validates the payload and publishes it to the order subject;
//!   "submitted" means durably queued, not yet persisted.
//! - Lookups read the storage adapter directly and never touch the queue.
//! - Every failure is returned to the caller; nothing is retried here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use model::{ModelError, Order};
use queue::{DurableQueue, QueueError, Subscription};
use repository::{OrdersRepository, RepositoryError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// The main error type for all operations in [`OrderService`] and [`MessageService`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The caller sent something that can never succeed.
    #[error("Invalid request: {0}")]
    Invalid(String),
    /// The requested order does not exist.
    #[error("Not found")]
    NotFound,
    /// Queue or storage could not be reached; the caller may retry.
    #[error("Unavailable: {0}")]
    Unavailable(String),
    /// Stored data could not be read back.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<ModelError> for ServiceError {
    fn from(err: ModelError) -> Self {
        ServiceError::Invalid(err.to_string())
    }
}

impl From<QueueError> for ServiceError {
    fn from(err: QueueError) -> Self {
        ServiceError::Unavailable(err.to_string())
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => ServiceError::NotFound,
            RepositoryError::Unavailable(msg) => ServiceError::Unavailable(msg),
            RepositoryError::ConstraintViolation(msg) => ServiceError::Invalid(msg),
            RepositoryError::Corrupt(msg) => ServiceError::Unexpected(msg),
        }
    }
}

/// Operations on orders exposed to callers.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Validates an order payload and queues it for ingestion.
    ///
    /// Returns the accepted `order_uid`.
    ///
    /// # Errors
    /// [`ServiceError::Invalid`] for a malformed payload or field,
    /// [`ServiceError::Unavailable`] when the queue did not accept it.
    async fn submit_order(&self, payload: &[u8]) -> Result<String, ServiceError>;

    /// Retrieves a persisted order by its unique ID.
    async fn get_order(&self, order_uid: &str) -> Result<Order, ServiceError>;

    /// Retrieves every persisted order.
    async fn list_orders(&self) -> Result<Vec<Order>, ServiceError>;
}

/// [`OrderService`] over a durable queue and an orders repository.
pub struct OrderServiceImpl<Q, R> {
    queue: Arc<Q>,
    orders_repo: Arc<R>,
    orders_subject: String,
}

impl<Q, R> OrderServiceImpl<Q, R>
where
    Q: DurableQueue,
    R: OrdersRepository,
{
    pub fn new(queue: Arc<Q>, orders_repo: Arc<R>, orders_subject: impl Into<String>) -> Self {
        Self {
            queue,
            orders_repo,
            orders_subject: orders_subject.into(),
        }
    }
}

#[async_trait]
impl<Q, R> OrderService for OrderServiceImpl<Q, R>
where
    Q: DurableQueue,
    R: OrdersRepository,
{
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    async fn submit_order(&self, payload: &[u8]) -> Result<String, ServiceError> {
        let order = model::decode(payload).inspect_err(|e| warn!("Rejected order payload: {e}"))?;
        let data = model::encode(&order)?;

        self.queue.publish(&self.orders_subject, &data).await?;
        info!(order_uid = %order.order_uid, "Order queued");
        Ok(order.order_uid)
    }

    #[instrument(skip(self))]
    async fn get_order(&self, order_uid: &str) -> Result<Order, ServiceError> {
        if order_uid.trim().is_empty() {
            return Err(ServiceError::Invalid("order id is required".into()));
        }
        Ok(self.orders_repo.get_by_id(order_uid).await?)
    }

    #[instrument(skip(self))]
    async fn list_orders(&self) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders_repo.get_all().await?)
    }
}

/// Free-form messages on the generic subject.
#[async_trait]
pub trait MessageService: Send + Sync {
    /// Appends a text message to the generic subject.
    async fn publish_message(&self, message: &str) -> Result<(), ServiceError>;

    /// Waits for the next unread message; `None` when the wait window closed first.
    async fn read_message(&self) -> Result<Option<String>, ServiceError>;
}

/// [`MessageService`] over one long-lived subscription of the generic subject.
///
/// The subscription is opened on the first read and kept, so a read does not
/// pay for joining the consumer group. Any queue error drops it; the next
/// read opens a fresh one, which resumes after the last acknowledged message.
/// Concurrent reads are served one at a time.
pub struct MessageServiceImpl<Q> {
    queue: Arc<Q>,
    subject: String,
    read_timeout: Duration,
    subscription: Mutex<Option<Box<dyn Subscription>>>,
}

impl<Q: DurableQueue> MessageServiceImpl<Q> {
    pub fn new(queue: Arc<Q>, subject: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            queue,
            subject: subject.into(),
            read_timeout,
            subscription: Mutex::new(None),
        }
    }

    async fn take_next(
        &self,
        slot: &mut Option<Box<dyn Subscription>>,
    ) -> Result<Option<String>, QueueError> {
        let subscription = match slot.take() {
            Some(subscription) => subscription,
            None => self.queue.subscribe(&self.subject).await?,
        };
        let subscription = slot.insert(subscription);
        let Some(msg) = subscription.next(self.read_timeout).await? else {
            return Ok(None);
        };
        msg.ack().await?;
        Ok(Some(String::from_utf8_lossy(msg.payload()).into_owned()))
    }
}

#[async_trait]
impl<Q: DurableQueue> MessageService for MessageServiceImpl<Q> {
    #[instrument(skip(self))]
    async fn publish_message(&self, message: &str) -> Result<(), ServiceError> {
        if message.is_empty() {
            return Err(ServiceError::Invalid("message is required".into()));
        }
        self.queue.publish(&self.subject, message.as_bytes()).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_message(&self) -> Result<Option<String>, ServiceError> {
        let mut slot = self.subscription.lock().await;
        let read = self.take_next(&mut slot).await;
        if let Err(e) = &read {
            warn!(subject = %self.subject, "Dropping generic subscription: {e}");
            *slot = None;
        }
        Ok(read?)
    }
}
