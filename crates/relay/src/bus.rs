//! Message bus producers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use thiserror::Error;

/// Errors raised while producing to the bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Send rejected without a broker-level cause (test double).
    #[error("send rejected: {0}")]
    Rejected(String),
}

/// A producer capable of keyed sends.
///
/// Returns the partition and offset the bus assigned, so callers can log
/// where a message landed. Messages with the same key land on the same
/// partition and stay ordered.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(i32, i64), BusError>;
}

/// Kafka-backed bus.
pub struct KafkaBus {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaBus {
    /// Creates a producer against `brokers` (comma-separated host:port
    /// list).
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            send_timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(i32, i64), BusError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(err, _)| BusError::Kafka(err))
    }
}

/// A message accepted by [`InMemoryBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct BusInner {
    sent: Vec<SentMessage>,
    fail_sends: bool,
    attempts: u64,
}

/// In-memory bus for tests.
///
/// Records accepted sends in order and can be switched to reject sends,
/// simulating a broker outage.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<Mutex<BusInner>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `fail` is set, every send is rejected until unset.
    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.lock().unwrap().fail_sends = fail;
    }

    /// All accepted messages, in send order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// How many sends were attempted, accepted or not.
    pub fn attempts(&self) -> u64 {
        self.inner.lock().unwrap().attempts
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(i32, i64), BusError> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;

        if inner.fail_sends {
            return Err(BusError::Rejected("injected send failure".to_string()));
        }

        inner.sent.push(SentMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        });

        Ok((0, inner.sent.len() as i64 - 1))
    }
}
