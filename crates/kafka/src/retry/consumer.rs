use crate::admin::KafkaTopicAdmin;
use crate::broker::TopicAdmin;
use crate::config::{ConsumerConfig, ProducerConfig};
use crate::consumer::{handler_fn, Consumer, Handler};
use crate::error::{Error, Result};
use crate::producer::{MessagePublisher, Producer};
use crate::retry::config::RetryConfig;
use crate::retry::scheduler::{RetryScheduler, SchedulerStats};
use message_types::Message;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Consumer that retries failed messages through a retry topic and dead-letters
/// them once `max_retry_attempts` is exhausted.
///
/// For a business topic `T` it provisions `T-retry` and `T-dlq` and installs two
/// wrappers on the base consumer: one for first deliveries on `T`, one for
/// re-deliveries on `T-retry`. Both invoke the same business handler.
pub struct RetryableConsumer {
    consumer: Consumer,
    admin: Arc<dyn TopicAdmin>,
    pipeline: Arc<RetryPipeline>,
}

impl RetryableConsumer {
    pub fn new(
        consumer: Consumer,
        publisher: Arc<dyn MessagePublisher>,
        admin: Arc<dyn TopicAdmin>,
        config: RetryConfig,
    ) -> Result<Self> {
        config.validate()?;

        let scheduler = RetryScheduler::new(
            Arc::clone(&publisher),
            config.max_pending_retries,
            config.republish_policy(),
        );

        Ok(Self {
            consumer,
            admin,
            pipeline: Arc::new(RetryPipeline {
                config,
                publisher,
                scheduler,
            }),
        })
    }

    /// Connect the consumer, producer and admin client to Kafka.
    pub fn from_config(
        consumer_config: &ConsumerConfig,
        producer_config: &ProducerConfig,
        config: RetryConfig,
    ) -> Result<Self> {
        let consumer = Consumer::new(consumer_config)?;
        let producer = Producer::new(producer_config)?;
        let admin = KafkaTopicAdmin::new(
            &producer_config.brokers,
            &producer_config.security_protocol,
        )?;

        Self::new(consumer, Arc::new(producer), Arc::new(admin), config)
    }

    /// Register a business handler for `topic` with retry and DLQ routing.
    pub async fn register_handler<F, Fut>(&mut self, topic: &str, handler: F) -> Result<()>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(topic, handler_fn(handler)).await
    }

    /// Same as [`register_handler`](Self::register_handler) for an already boxed handler.
    ///
    /// Either both the business and the retry topic end up registered, or neither.
    pub async fn register(&mut self, topic: &str, handler: Handler) -> Result<()> {
        let config = &self.pipeline.config;
        let retry_topic = config.retry_topic(topic);

        self.admin.ensure_topics(&config.side_topics(topic)).await?;

        let first_attempt = self.wrap(topic, handler.clone(), Attempt::First);
        self.register_with_retry(topic, first_attempt).await?;

        let retry_attempt = self.wrap(topic, handler, Attempt::Retry);
        if let Err(e) = self.register_with_retry(&retry_topic, retry_attempt).await {
            if let Err(rollback) = self.consumer.unregister_handler(topic).await {
                warn!(
                    "Failed to resubscribe after removing handler for {}: {}",
                    topic, rollback
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn wrap(&self, origin: &str, handler: Handler, attempt: Attempt) -> Handler {
        let pipeline = Arc::clone(&self.pipeline);
        let origin: Arc<str> = Arc::from(origin);

        handler_fn(move |message: Message| {
            let pipeline = Arc::clone(&pipeline);
            let handler = Arc::clone(&handler);
            let origin = Arc::clone(&origin);
            async move {
                let result = match attempt {
                    Attempt::First => pipeline.first_attempt(message, &handler, &origin).await,
                    Attempt::Retry => pipeline.retry_attempt(message, &handler, &origin).await,
                };
                result.map_err(anyhow::Error::from)
            }
        })
    }

    async fn register_with_retry(&mut self, topic: &str, handler: Handler) -> Result<()> {
        let attempts = self.pipeline.config.registration_attempts;
        let mut attempt = 1;

        loop {
            match self.consumer.register_handler(topic, handler.clone()).await {
                Ok(()) => {
                    info!("Successfully registered handler for {}", topic);
                    return Ok(());
                }
                Err(e) if !e.is_retryable_setup_error() => return Err(e),
                Err(e) if attempt >= attempts => {
                    return Err(Error::Registration {
                        topic: topic.to_string(),
                        attempts,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let wait = self.pipeline.config.registration_delay(attempt);
                    warn!(
                        "Failed to register handler for {} (attempt {}), retrying in {:?}: {}",
                        topic, attempt, wait, e
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run the underlying poll loop. See [`Consumer::start`].
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        self.consumer.start(shutdown).await
    }

    /// Close the consumer, stop the retry scheduler, then flush and close the producer.
    ///
    /// Retries still waiting for their delay are dropped and counted as cancelled;
    /// call [`drain_retries`](Self::drain_retries) first to publish them.
    pub async fn close(&self) -> Result<()> {
        let consumer_result = self.consumer.close().await;
        self.pipeline.scheduler.shutdown().await;
        let producer_result = self.pipeline.publisher.close().await;
        consumer_result.and(producer_result)
    }

    /// Wait until every scheduled retry has been published.
    ///
    /// Draining is terminal: the scheduler stops accepting retries, so a failure
    /// seen by a poll loop still running afterwards returns
    /// [`Error::SchedulerClosed`]. Stop polling before draining.
    pub async fn drain_retries(&self) {
        self.pipeline.scheduler.drain().await;
    }

    pub fn retry_stats(&self) -> SchedulerStats {
        self.pipeline.scheduler.stats()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.pipeline.config
    }

    pub fn topics(&self) -> Vec<String> {
        self.consumer.topics()
    }
}

#[derive(Debug, Clone, Copy)]
enum Attempt {
    First,
    Retry,
}

struct RetryPipeline {
    config: RetryConfig,
    publisher: Arc<dyn MessagePublisher>,
    scheduler: RetryScheduler,
}

impl RetryPipeline {
    /// Delivery on the business topic.
    async fn first_attempt(
        &self,
        mut message: Message,
        handler: &Handler,
        origin: &str,
    ) -> Result<()> {
        let key = message.key.clone();
        let meta = message.meta_mut();
        meta.original_topic = origin.to_string();
        meta.original_key = key;

        match handler(message.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Handler for {} failed on message {}: {:#}", origin, message.key, e);
                self.schedule_retry(message, &e, 1, origin).await
            }
        }
    }

    /// Re-delivery on the retry topic.
    async fn retry_attempt(&self, message: Message, handler: &Handler, origin: &str) -> Result<()> {
        let retry_count = match message.retry_count() {
            0 => {
                warn!(
                    "Message {} on {} has no retry count, assuming 1",
                    message.key, message.topic
                );
                1
            }
            n => n,
        };

        let Err(e) = handler(message.clone()).await else {
            return Ok(());
        };

        let next = retry_count.saturating_add(1);
        warn!(
            "Handler for {} failed on message {} (retry {}): {:#}",
            origin, message.key, retry_count, e
        );

        if next > self.config.max_retry_attempts {
            self.escalate_to_dlq(message, &e, next, origin).await
        } else {
            self.schedule_retry(message, &e, next, origin).await
        }
    }

    async fn schedule_retry(
        &self,
        mut message: Message,
        failure: &anyhow::Error,
        attempt: u32,
        origin: &str,
    ) -> Result<()> {
        stamp_failure(&mut message, failure, attempt, origin);

        let retry_message = message.forward_to(self.config.retry_topic(origin));
        let delay = self.config.backoff(attempt);
        info!(
            "Scheduling retry {} of message {} to {} in {:?}",
            attempt, retry_message.key, retry_message.topic, delay
        );

        self.scheduler.schedule(retry_message, delay).await
    }

    async fn escalate_to_dlq(
        &self,
        mut message: Message,
        failure: &anyhow::Error,
        attempt: u32,
        origin: &str,
    ) -> Result<()> {
        stamp_failure(&mut message, failure, attempt, origin);

        let dlq_message = message.forward_to(self.config.dlq_topic(origin));
        error!(
            "Message {} failed {} times, sending to {}: {:#}",
            dlq_message.key, attempt, dlq_message.topic, failure
        );

        self.publisher.publish(dlq_message).await
    }
}

fn stamp_failure(message: &mut Message, failure: &anyhow::Error, attempt: u32, origin: &str) {
    let key = message.key.clone();
    let meta = message.meta_mut();
    meta.retry_count = attempt;
    meta.original_topic = origin.to_string();
    meta.original_key = key;
    meta.error_message = format!("{failure:#}");
}
