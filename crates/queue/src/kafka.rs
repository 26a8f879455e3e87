//! Kafka-backed durable queue.
//!
//! Every subject is a single-partition topic, which keeps delivery FIFO per
//! subject. Subscriptions use one consumer group per subject with
//! auto-commit disabled: `ack` commits the next offset, `nack` seeks back so
//! the same record is fetched again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{AckHandle, DurableQueue, QueueError, QueueMessage, Subscription};

/// Connection settings of [`KafkaQueue`].
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    /// Consumer groups are named `<group_prefix>.<subject>`.
    pub group_prefix: String,
    pub publish_timeout: Duration,
}

/// Upper bound of the blocking seek behind `nack`.
const SEEK_TIMEOUT: Duration = Duration::from_secs(1);

/// Delivery counts keyed by (partition, offset).
type Attempts = Arc<Mutex<HashMap<(i32, i64), u32>>>;

pub struct KafkaQueue {
    producer: FutureProducer,
    settings: KafkaSettings,
}

impl KafkaQueue {
    /// Connects to the brokers and makes sure every subject has a topic.
    ///
    /// Fails when the cluster cannot be reached, so the process never starts
    /// serving against a half-initialized log.
    pub async fn connect(settings: KafkaSettings, subjects: &[&str]) -> Result<Self, QueueError> {
        let brokers = settings.brokers.join(",");
        let timeout_ms = settings.publish_timeout.as_millis().to_string();

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", &timeout_ms)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(unavailable)?;

        let probe = producer.clone();
        let wait = settings.publish_timeout;
        tokio::task::spawn_blocking(move || probe.client().fetch_metadata(None, wait))
            .await
            .map_err(|e| QueueError::PublishUnavailable(e.to_string()))?
            .map_err(unavailable)?;
        info!(%brokers, "Connected to Kafka");

        let queue = Self { producer, settings };
        queue.ensure_topics(subjects).await?;
        Ok(queue)
    }

    /// Creates missing topics; a topic that already exists is left as is.
    async fn ensure_topics(&self, subjects: &[&str]) -> Result<(), QueueError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", self.settings.brokers.join(","))
            .create()
            .map_err(unavailable)?;

        let topics: Vec<NewTopic<'_>> = subjects
            .iter()
            .map(|subject| NewTopic::new(subject, 1, TopicReplication::Fixed(1)))
            .collect();

        let results = admin
            .create_topics(&topics, &AdminOptions::new())
            .await
            .map_err(unavailable)?;

        for result in results {
            match result {
                Ok(topic) => info!(%topic, "Stream created"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    info!(%topic, "Stream already exists")
                }
                Err((topic, code)) => {
                    return Err(QueueError::PublishUnavailable(format!(
                        "failed to create topic {topic}: {code}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DurableQueue for KafkaQueue {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), QueueError> {
        let record = FutureRecord::<(), [u8]>::to(subject).payload(payload);
        self.producer
            .send(record, self.settings.publish_timeout)
            .await
            .map(|_| debug!(%subject, "Message appended"))
            .map_err(|(err, _)| unavailable(err))
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, QueueError> {
        let group_id = format!("{}.{}", self.settings.group_prefix, subject);
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", self.settings.brokers.join(","))
            .set("group.id", &group_id)
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| QueueError::SubscribeUnavailable(e.to_string()))?;

        consumer
            .subscribe(&[subject])
            .map_err(|e| QueueError::SubscribeUnavailable(e.to_string()))?;
        debug!(%subject, %group_id, "Subscribed");

        Ok(Box::new(KafkaSubscription {
            subject: subject.to_string(),
            consumer: Arc::new(consumer),
            attempts: Attempts::default(),
        }))
    }
}

struct KafkaSubscription {
    subject: String,
    consumer: Arc<StreamConsumer>,
    attempts: Attempts,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next(&mut self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let (partition, offset, payload) =
            match tokio::time::timeout(wait, self.consumer.recv()).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => return Err(QueueError::SubscribeUnavailable(e.to_string())),
                Ok(Ok(msg)) => (
                    msg.partition(),
                    msg.offset(),
                    msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                ),
            };

        let attempt = {
            let mut attempts = self.attempts.lock().await;
            let count = attempts.entry((partition, offset)).or_insert(0);
            *count += 1;
            *count
        };

        let handle = KafkaAck {
            consumer: self.consumer.clone(),
            attempts: self.attempts.clone(),
            topic: self.subject.clone(),
            partition,
            offset,
        };
        Ok(Some(QueueMessage::new(
            self.subject.clone(),
            payload,
            attempt,
            Box::new(handle),
        )))
    }
}

struct KafkaAck {
    consumer: Arc<StreamConsumer>,
    attempts: Attempts,
    topic: String,
    partition: i32,
    offset: i64,
}

#[async_trait]
impl AckHandle for KafkaAck {
    async fn ack(&self) -> Result<(), QueueError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(ack_failed)?;

        // Synchronous commit: the consumer may be dropped right after acking.
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| QueueError::AckFailed(e.to_string()))?
            .map_err(ack_failed)?;

        self.attempts.lock().await.remove(&(self.partition, self.offset));
        Ok(())
    }

    async fn nack(&self) -> Result<(), QueueError> {
        let consumer = self.consumer.clone();
        let topic = self.topic.clone();
        let (partition, offset) = (self.partition, self.offset);
        tokio::task::spawn_blocking(move || {
            consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
        })
        .await
        .map_err(|e| QueueError::AckFailed(e.to_string()))?
        .map_err(ack_failed)
    }
}

fn unavailable(err: KafkaError) -> QueueError {
    QueueError::PublishUnavailable(err.to_string())
}

fn ack_failed(err: KafkaError) -> QueueError {
    QueueError::AckFailed(err.to_string())
}
