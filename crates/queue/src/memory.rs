//! In-process durable queue.
//!
//! Each subject is an append-only log that outlives its subscriptions. A
//! subscription walks the log from the start and skips acknowledged
//! entries, so dropping it without acknowledging replays the message to the
//! next subscriber, the same way an uncommitted Kafka offset does.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::{AckHandle, DurableQueue, QueueError, QueueMessage, Subscription};

#[derive(Debug, Default)]
struct Stream {
    log: Vec<Vec<u8>>,
    acked: HashSet<usize>,
    attempts: HashMap<usize, u32>,
}

#[derive(Debug, Default)]
struct Inner {
    streams: Mutex<HashMap<String, Stream>>,
    appended: Notify,
    unavailable: AtomicBool,
}

/// Thread-safe in-memory implementation of [`DurableQueue`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the connection to the log.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every payload ever appended to `subject`, in order.
    pub async fn messages(&self, subject: &str) -> Vec<Vec<u8>> {
        let streams = self.inner.streams.lock().await;
        streams
            .get(subject)
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    /// Number of messages on `subject` not acknowledged yet.
    pub async fn pending(&self, subject: &str) -> usize {
        let streams = self.inner.streams.lock().await;
        streams
            .get(subject)
            .map(|s| s.log.len() - s.acked.len())
            .unwrap_or(0)
    }

    fn is_unavailable(&self) -> bool {
        self.inner.unavailable.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), QueueError> {
        if self.is_unavailable() {
            return Err(QueueError::PublishUnavailable("log unreachable".into()));
        }
        let mut streams = self.inner.streams.lock().await;
        streams
            .entry(subject.to_string())
            .or_default()
            .log
            .push(payload.to_vec());
        drop(streams);

        self.inner.appended.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, QueueError> {
        if self.is_unavailable() {
            return Err(QueueError::SubscribeUnavailable("log unreachable".into()));
        }
        Ok(Box::new(MemorySubscription {
            queue: self.clone(),
            subject: subject.to_string(),
            cursor: Arc::new(Mutex::new(0)),
        }))
    }
}

struct MemorySubscription {
    queue: InMemoryQueue,
    subject: String,
    cursor: Arc<Mutex<usize>>,
}

impl MemorySubscription {
    async fn take_next(&self) -> Option<QueueMessage> {
        let mut streams = self.queue.inner.streams.lock().await;
        let stream = streams.entry(self.subject.clone()).or_default();
        let mut cursor = self.cursor.lock().await;

        while *cursor < stream.log.len() && stream.acked.contains(&*cursor) {
            *cursor += 1;
        }
        if *cursor >= stream.log.len() {
            return None;
        }

        let offset = *cursor;
        *cursor += 1;
        let attempt = stream.attempts.entry(offset).or_insert(0);
        *attempt += 1;

        let handle = MemoryAck {
            queue: self.queue.clone(),
            subject: self.subject.clone(),
            cursor: self.cursor.clone(),
            offset,
        };
        Some(QueueMessage::new(
            self.subject.clone(),
            stream.log[offset].clone(),
            *attempt,
            Box::new(handle),
        ))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if self.queue.is_unavailable() {
                return Err(QueueError::SubscribeUnavailable("log unreachable".into()));
            }

            // Registered before looking at the log so an append in between is not missed.
            let appended = self.queue.inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(msg) = self.take_next().await {
                return Ok(Some(msg));
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }
}

struct MemoryAck {
    queue: InMemoryQueue,
    subject: String,
    cursor: Arc<Mutex<usize>>,
    offset: usize,
}

#[async_trait]
impl AckHandle for MemoryAck {
    async fn ack(&self) -> Result<(), QueueError> {
        if self.queue.is_unavailable() {
            return Err(QueueError::AckFailed("log unreachable".into()));
        }
        let mut streams = self.queue.inner.streams.lock().await;
        if let Some(stream) = streams.get_mut(&self.subject) {
            stream.acked.insert(self.offset);
        }
        Ok(())
    }

    async fn nack(&self) -> Result<(), QueueError> {
        let mut cursor = self.cursor.lock().await;
        *cursor = (*cursor).min(self.offset);
        Ok(())
    }
}
