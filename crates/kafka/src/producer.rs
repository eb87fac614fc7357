//! Message producer.
//!
//! Used both by application code and by the retry pipeline to re-inject failed
//! messages. Every publish waits for the delivery report of its own record.

use crate::broker::{OutboundRecord, RecordSink};
use crate::config::ProducerConfig;
use crate::error::{Error, Result};
use message_types::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as RdkafkaProducer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Publishes messages.
///
/// Implementations must be safe for concurrent `publish` calls; each call blocks
/// only its own caller.
#[async_trait::async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one message and wait until the broker acknowledges it.
    ///
    /// There is no internal retry.
    async fn publish(&self, message: Message) -> Result<()>;

    /// Flush buffered records and release the client.
    async fn close(&self) -> Result<()>;
}

/// `RecordSink` backed by an rdkafka `FutureProducer`.
pub struct KafkaRecordSink {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl KafkaRecordSink {
    pub fn new(config: &ProducerConfig) -> Result<Self> {
        let producer: FutureProducer = config.client_config().create()?;
        Ok(Self {
            producer,
            queue_timeout: config.message_timeout,
        })
    }
}

#[async_trait::async_trait]
impl RecordSink for KafkaRecordSink {
    async fn send(&self, record: OutboundRecord) -> Result<()> {
        let future_record = FutureRecord::to(&record.topic)
            .key(record.key.as_slice())
            .payload(record.payload.as_slice());

        self.producer
            .send(future_record, self.queue_timeout)
            .await
            .map(|_| ())
            .map_err(|(err, _)| Error::Delivery {
                topic: record.topic.clone(),
                reason: err.to_string(),
            })
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout)).await??;
        Ok(())
    }
}

/// Producer that resolves topics, stamps metadata and serializes values.
pub struct Producer {
    sink: Arc<dyn RecordSink>,
    default_topic: String,
    flush_timeout: Duration,
    closed: AtomicBool,
}

impl Producer {
    /// Create a Kafka producer
    pub fn new(config: &ProducerConfig) -> Result<Self> {
        let sink = KafkaRecordSink::new(config)?;
        Ok(Self::with_sink(
            Arc::new(sink),
            config.default_topic.clone(),
            config.flush_timeout,
        ))
    }

    /// Create a producer writing to an arbitrary sink.
    pub fn with_sink(
        sink: Arc<dyn RecordSink>,
        default_topic: impl Into<String>,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            default_topic: default_topic.into(),
            flush_timeout,
            closed: AtomicBool::new(false),
        }
    }

    fn resolve_topic(&self, topic: &str) -> Result<String> {
        match (topic.is_empty(), self.default_topic.is_empty()) {
            (false, _) => Ok(topic.to_string()),
            (true, false) => Ok(self.default_topic.clone()),
            (true, true) => Err(Error::NoTopic),
        }
    }
}

#[async_trait::async_trait]
impl MessagePublisher for Producer {
    async fn publish(&self, mut message: Message) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let topic = self.resolve_topic(&message.topic)?;
        message.meta_mut().timestamp = now_nanos();

        let payload = message.value.to_bytes().map_err(|source| Error::Encode {
            topic: topic.clone(),
            source,
        })?;

        self.sink
            .send(OutboundRecord {
                topic: topic.clone(),
                key: message.key.clone().into_bytes(),
                payload,
            })
            .await?;

        debug!("Published message {} to topic {}", message.key, topic);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Producer already closed");
            return Ok(());
        }
        self.sink.flush(self.flush_timeout).await
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
