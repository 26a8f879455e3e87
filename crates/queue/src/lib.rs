//! Durable queue adapter.
//!
//! The rest of the workspace sees the message log only through
//! [`DurableQueue`]: `publish` appends to a subject, `subscribe` opens a
//! restartable at-least-once stream of [`QueueMessage`]s that must be
//! acknowledged one by one. [`KafkaQueue`] backs it with Kafka topics and
//! manual offset commits; [`InMemoryQueue`] keeps the same contract in process.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod kafka;
pub mod memory;

pub use kafka::{KafkaQueue, KafkaSettings};
pub use memory::InMemoryQueue;

/// Errors returned by queue adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The log did not confirm the append; the message must be assumed lost.
    #[error("Publish unavailable: {0}")]
    PublishUnavailable(String),
    /// The subscription could not be opened or polled.
    #[error("Subscribe unavailable: {0}")]
    SubscribeUnavailable(String),
    /// Acknowledging or rewinding a delivered message failed.
    #[error("Acknowledgment failed: {0}")]
    AckFailed(String),
}

/// Append and subscribe access to the durable log.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Appends `payload` to `subject`, returning once the log has persisted it.
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Opens a durable subscription on `subject`.
    ///
    /// A new subscription resumes after the last acknowledged message, so
    /// anything delivered but never acknowledged is delivered again.
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, QueueError>;
}

/// A pull-based, FIFO-per-subject sequence of deliveries.
#[async_trait]
pub trait Subscription: Send {
    /// Waits up to `wait` for the next message.
    ///
    /// `Ok(None)` means nothing arrived in time; it is not an error.
    async fn next(&mut self, wait: Duration) -> Result<Option<QueueMessage>, QueueError>;
}

/// Settles a single delivery.
#[async_trait]
pub trait AckHandle: Send + Sync {
    /// Marks the message as processed so it is never delivered again.
    async fn ack(&self) -> Result<(), QueueError>;

    /// Rewinds the subscription so the message is delivered again.
    async fn nack(&self) -> Result<(), QueueError>;
}

/// One delivery of a message together with its acknowledgment handle.
pub struct QueueMessage {
    subject: String,
    payload: Vec<u8>,
    delivery_attempt: u32,
    handle: Box<dyn AckHandle>,
}

impl QueueMessage {
    pub fn new(
        subject: impl Into<String>,
        payload: Vec<u8>,
        delivery_attempt: u32,
        handle: Box<dyn AckHandle>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            delivery_attempt,
            handle,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// How many times this message has been handed out in this process, starting at 1.
    pub fn delivery_attempt(&self) -> u32 {
        self.delivery_attempt
    }

    pub async fn ack(&self) -> Result<(), QueueError> {
        self.handle.ack().await
    }

    pub async fn nack(&self) -> Result<(), QueueError> {
        self.handle.nack().await
    }
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMessage")
            .field("subject", &self.subject)
            .field("len", &self.payload.len())
            .field("delivery_attempt", &self.delivery_attempt)
            .finish()
    }
}
