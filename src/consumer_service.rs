//! Lifecycle of the service's message consumers.

use anyhow::Context;
use courier_kafka::{Error as KafkaError, RetryableConsumer, SchedulerStats};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A consumer that wires its handlers into the shared retryable consumer.
#[async_trait::async_trait]
pub trait ConsumerSetup: Send + Sync {
    fn name(&self) -> &str;

    async fn setup(&self, consumer: &mut RetryableConsumer) -> anyhow::Result<()>;
}

/// Runs every consumer's setup, then the shared poll loop.
pub struct ConsumerService {
    consumer: RetryableConsumer,
    setups: Vec<Box<dyn ConsumerSetup>>,
}

impl ConsumerService {
    pub fn new(consumer: RetryableConsumer) -> Self {
        Self {
            consumer,
            setups: Vec::new(),
        }
    }

    pub fn with_consumer(mut self, setup: impl ConsumerSetup + 'static) -> Self {
        self.setups.push(Box::new(setup));
        self
    }

    /// Set up every consumer and consume until `shutdown` is cancelled.
    ///
    /// Cancellation is a clean exit. Once polling stops, pending retries get up to
    /// [`RetryConfig::drain_timeout`](courier_kafka::RetryConfig::drain_timeout) to
    /// be published before the consumer is closed and the rest are dropped. The
    /// retryable consumer is closed on every path once setup succeeded; its final
    /// retry counters are returned.
    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<SchedulerStats> {
        for setup in &self.setups {
            setup
                .setup(&mut self.consumer)
                .await
                .with_context(|| format!("Failed to setup {} consumer", setup.name()))?;
            info!("Consumer '{}' is set up", setup.name());
        }
        info!(
            "All consumers have been set up, consuming {:?}",
            self.consumer.topics()
        );

        let result = match self.consumer.start(shutdown).await {
            Ok(()) | Err(KafkaError::Cancelled) => {
                info!("Consumer service stopped");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context("Kafka consumer stopped")),
        };

        self.drain_pending_retries().await;

        if let Err(e) = self.consumer.close().await {
            warn!("Failed to close consumer cleanly: {}", e);
        }

        result.map(|()| self.consumer.retry_stats())
    }

    async fn drain_pending_retries(&self) {
        let pending = self.consumer.retry_stats().pending;
        if pending == 0 {
            return;
        }

        let timeout = self.consumer.retry_config().drain_timeout();
        info!("Waiting up to {:?} for {} pending retries", timeout, pending);
        if tokio::time::timeout(timeout, self.consumer.drain_retries())
            .await
            .is_err()
        {
            warn!(
                "{} retries still pending after {:?}, dropping them",
                self.consumer.retry_stats().pending,
                timeout
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{MemoryNotificationSink, NotificationConsumer};
    use crate::orders::{order_created_message, OrderCreated, ORDERS_TOPIC};
    use courier_kafka::memory::MemoryBroker;
    use courier_kafka::{Consumer, Message, Producer, RetryConfig};
    use std::sync::Arc;
    use std::time::Duration;

    struct FailingSetup;

    #[async_trait::async_trait]
    impl ConsumerSetup for FailingSetup {
        fn name(&self) -> &str {
            "failing"
        }

        async fn setup(&self, _consumer: &mut RetryableConsumer) -> anyhow::Result<()> {
            anyhow::bail!("no database")
        }
    }

    fn retryable(broker: &MemoryBroker) -> RetryableConsumer {
        let consumer = Consumer::with_source(Box::new(broker.source()), Duration::from_millis(100));
        let producer = Producer::with_sink(Arc::new(broker.sink()), "", Duration::from_secs(1));
        RetryableConsumer::new(
            consumer,
            Arc::new(producer),
            Arc::new(broker.admin()),
            RetryConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_setup_failure_names_the_consumer() {
        let broker = MemoryBroker::new();
        let service = ConsumerService::new(retryable(&broker)).with_consumer(FailingSetup);

        let err = service.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to setup failing consumer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_publishes_pending_retries() {
        let broker = MemoryBroker::new();
        let sink = MemoryNotificationSink::new();
        sink.fail_next(1);
        let service = ConsumerService::new(retryable(&broker))
            .with_consumer(NotificationConsumer::new(Arc::new(sink), "localhost:8081"));

        let order = OrderCreated {
            order_id: "42".to_string(),
            user_id: "user-42".to_string(),
            amount: 10.0,
            status: "PENDING".to_string(),
        };
        let message = order_created_message(&order).unwrap();
        broker.append(ORDERS_TOPIC, &message.key, &message.value);

        // Cancelled while the first retry still waits out its two second backoff.
        let shutdown = CancellationToken::new();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        });

        let stats = service.run(shutdown).await.unwrap();

        assert_eq!(stats.published, 1);
        assert_eq!(stats.cancelled, 0);
        assert_eq!(stats.pending, 0);
        let counts: Vec<u32> = broker
            .messages("orders-topic-retry")
            .iter()
            .map(Message::retry_count)
            .collect();
        assert_eq!(counts, vec![1]);
    }

    #[tokio::test]
    async fn test_no_consumers_is_an_error() {
        let broker = MemoryBroker::new();
        let service = ConsumerService::new(retryable(&broker));

        let err = service.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KafkaError>(),
            Some(KafkaError::NoHandlers)
        ));
    }
}
