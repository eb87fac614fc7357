//! End-to-end run of the order notification pipeline against an in-memory broker.
//!
//! Publishes a batch of orders, lets the notification sink reject the first few
//! notifications and consumes until every order was either notified or
//! dead-lettered.

use crate::consumer_service::ConsumerService;
use crate::notification::{MemoryNotificationSink, NotificationConsumer};
use crate::orders::{publish_order_created, OrderCreated, ORDERS_TOPIC};
use courier_kafka::memory::MemoryBroker;
use courier_kafka::{Consumer, Producer, RetryConfig, RetryableConsumer, SchedulerStats};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub orders: usize,
    /// Notifications the sink rejects before accepting any
    pub failing_notifications: usize,
    pub retry: RetryConfig,
    pub link_base: String,
    /// Upper bound on the whole run
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub key: String,
    pub retry_count: u32,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Every order was notified or dead-lettered before the timeout
    pub completed: bool,
    pub orders_published: usize,
    pub notifications: usize,
    pub retry_topic_messages: usize,
    pub dead_letters: Vec<DeadLetter>,
    pub retry_stats: SchedulerStats,
}

pub async fn run_simulation(config: SimulationConfig) -> anyhow::Result<SimulationReport> {
    let broker = MemoryBroker::new();
    let producer = Arc::new(Producer::with_sink(
        Arc::new(broker.sink()),
        "",
        Duration::from_secs(1),
    ));
    let retry_topic = config.retry.retry_topic(ORDERS_TOPIC);
    let dlq_topic = config.retry.dlq_topic(ORDERS_TOPIC);

    let consumer = RetryableConsumer::new(
        Consumer::with_source(Box::new(broker.source()), POLL_TIMEOUT),
        producer.clone(),
        Arc::new(broker.admin()),
        config.retry.clone(),
    )?;

    let sink = MemoryNotificationSink::new();
    sink.fail_next(config.failing_notifications);
    let service = ConsumerService::new(consumer).with_consumer(NotificationConsumer::new(
        Arc::new(sink.clone()),
        config.link_base.clone(),
    ));

    for n in 1..=config.orders {
        let order = OrderCreated {
            order_id: n.to_string(),
            user_id: uuid::Uuid::new_v4().to_string(),
            amount: 10.0 * n as f64,
            status: "PENDING".to_string(),
        };
        publish_order_created(producer.as_ref(), &order).await?;
    }
    info!("Published {} orders", config.orders);

    let shutdown = CancellationToken::new();
    let watcher = {
        let broker = broker.clone();
        let sink = sink.clone();
        let dlq_topic = dlq_topic.clone();
        let shutdown = shutdown.clone();
        let expected = config.orders;
        let deadline = tokio::time::Instant::now() + config.timeout;

        tokio::spawn(async move {
            loop {
                let settled = sink.notifications().len() + broker.messages(&dlq_topic).len();
                if settled >= expected {
                    shutdown.cancel();
                    return true;
                }
                if shutdown.is_cancelled() {
                    return false;
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!("Simulation timed out with {}/{} orders settled", settled, expected);
                    shutdown.cancel();
                    return false;
                }
                tokio::time::sleep(CHECK_INTERVAL).await;
            }
        })
    };

    let retry_stats = service.run(shutdown.clone()).await;
    shutdown.cancel();
    let completed = watcher.await?;
    let retry_stats = retry_stats?;

    let dead_letters = broker
        .messages(&dlq_topic)
        .into_iter()
        .map(|message| {
            let meta = message.value.meta.unwrap_or_default();
            DeadLetter {
                key: message.key,
                retry_count: meta.retry_count,
                error_message: meta.error_message,
            }
        })
        .collect();

    Ok(SimulationReport {
        completed,
        orders_published: config.orders,
        notifications: sink.notifications().len(),
        retry_topic_messages: broker.messages(&retry_topic).len(),
        dead_letters,
        retry_stats,
    })
}
