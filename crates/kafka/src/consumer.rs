use crate::broker::{InboundRecord, RecordSource};
use crate::config::ConsumerConfig;
use crate::error::{Error, Result};
use message_types::{Message, MessageTypesError, MessageValue};
use rdkafka::consumer::{Consumer as RdkafkaConsumer, StreamConsumer as RdkafkaStreamConsumer};
use rdkafka::message::Message as RdkafkaMessage;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Type alias for message handler functions
///
/// A handler error never stops the consumer. Arranging a retry is the handler's
/// job (see [`crate::retry::RetryableConsumer`]).
pub type Handler =
    Arc<dyn Fn(Message) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

/// Box an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// `RecordSource` backed by an rdkafka `StreamConsumer`.
pub struct KafkaRecordSource {
    consumer: RdkafkaStreamConsumer,
}

impl KafkaRecordSource {
    pub fn new(config: &ConsumerConfig) -> Result<Self> {
        let consumer: RdkafkaStreamConsumer = config
            .client_config()
            .create()
            .map_err(|e| Error::Consumer(format!("Failed to create consumer: {e}")))?;
        Ok(Self { consumer })
    }
}

#[async_trait::async_trait]
impl RecordSource for KafkaRecordSource {
    async fn subscribe(&self, topics: &[String]) -> Result<()> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| Error::Consumer(format!("Failed to subscribe to topics: {e}")))
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<InboundRecord>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(Ok(msg)) => Ok(Some(InboundRecord {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
                key: msg.key().map(|k| k.to_vec()),
                payload: msg.payload().map(|p| p.to_vec()),
            })),
            Ok(Err(e)) => Err(Error::Kafka(e)),
            Err(_) => Ok(None),
        }
    }

    async fn close(&self) -> Result<()> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// Single poll loop dispatching messages to per-topic handlers.
///
/// Handlers are registered during setup (`&mut self`) and only read once
/// [`Consumer::start`] runs. They execute inline in the loop, so messages of one
/// partition are handled in offset order and a slow handler stalls every topic
/// on this consumer.
pub struct Consumer {
    source: Box<dyn RecordSource>,
    handlers: BTreeMap<String, Handler>,
    poll_timeout: Duration,
}

impl Consumer {
    /// Create a new Kafka consumer
    pub fn new(config: &ConsumerConfig) -> Result<Self> {
        let source = KafkaRecordSource::new(config)?;
        Ok(Self::with_source(Box::new(source), config.poll_timeout))
    }

    pub fn with_source(source: Box<dyn RecordSource>, poll_timeout: Duration) -> Self {
        Self {
            source,
            handlers: BTreeMap::new(),
            poll_timeout,
        }
    }

    /// Register the handler for `topic` and subscribe to it.
    ///
    /// A second registration for the same topic is rejected. The subscription is
    /// recomputed as every topic with a handler.
    pub async fn register_handler(&mut self, topic: &str, handler: Handler) -> Result<()> {
        if self.handlers.contains_key(topic) {
            return Err(Error::HandlerAlreadyRegistered(topic.to_string()));
        }

        self.handlers.insert(topic.to_string(), handler);

        let topics = self.topics();
        if let Err(e) = self.source.subscribe(&topics).await {
            // Keep the registry in line with the live subscription so the caller can retry.
            self.handlers.remove(topic);
            return Err(e);
        }

        debug!("Subscribed to topics: {:?}", topics);
        Ok(())
    }

    /// Remove the handler for `topic` and shrink the subscription to the remaining topics.
    ///
    /// Returns `false` when no handler was registered. With no topics left the
    /// subscription is kept as is, since [`Consumer::start`] refuses to poll
    /// without handlers.
    pub async fn unregister_handler(&mut self, topic: &str) -> Result<bool> {
        if self.handlers.remove(topic).is_none() {
            return Ok(false);
        }

        let topics = self.topics();
        if !topics.is_empty() {
            self.source.subscribe(&topics).await?;
            debug!("Subscribed to topics: {:?}", topics);
        }
        Ok(true)
    }

    /// Topics with a registered handler, in subscription order.
    pub fn topics(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn has_handler(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    /// Run the poll loop until cancelled or a fatal error occurs.
    ///
    /// Poll timeouts are not errors. Broker read errors and undecodable values end
    /// the loop; handler errors are logged and the loop continues. Cancellation is
    /// checked once per iteration and returns [`Error::Cancelled`].
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        if self.handlers.is_empty() {
            return Err(Error::NoHandlers);
        }

        info!("Starting consumer for topics: {:?}", self.topics());

        loop {
            if shutdown.is_cancelled() {
                info!("Consumer shutdown requested");
                return Err(Error::Cancelled);
            }

            let record = match self.source.poll(self.poll_timeout).await? {
                Some(record) => record,
                None => continue,
            };

            let message = decode_record(record)?;
            self.dispatch(message).await;
        }
    }

    async fn dispatch(&self, message: Message) {
        let Some(handler) = self.handlers.get(&message.topic) else {
            warn!("No handler registered for topic: {}", message.topic);
            return;
        };

        let topic = message.topic.clone();
        let (partition, offset) = (message.partition, message.offset);
        if let Err(e) = handler(message).await {
            error!(
                "Error processing message from topic {} (partition {}, offset {}): {:#}",
                topic, partition, offset, e
            );
        }
    }

    /// Release the broker client.
    pub async fn close(&self) -> Result<()> {
        self.source.close().await
    }
}

fn decode_record(record: InboundRecord) -> Result<Message> {
    let decode_error = |source| Error::Decode {
        topic: record.topic.clone(),
        partition: record.partition,
        offset: record.offset,
        source,
    };

    let payload = record
        .payload
        .as_deref()
        .ok_or_else(|| decode_error(MessageTypesError::MissingValue))?;
    let value = MessageValue::from_bytes(payload).map_err(decode_error)?;

    let key = record
        .key
        .as_deref()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .unwrap_or_default();

    Ok(Message {
        key,
        topic: record.topic,
        partition: record.partition,
        offset: record.offset,
        value,
    })
}
