//! Notification consumer under failing notification stores.
//!
//! Test flow:
//! 1. Publish ORDER_CREATED events to orders-topic
//! 2. Run the consumer service with a notification sink rejecting some calls
//! 3. Stop once every order was notified or dead-lettered
//! 4. Check retry topic, DLQ topic and sink contents

use courier::orders::ORDERS_TOPIC;
use courier::{
    publish_order_created, ConsumerService, MemoryNotificationSink, NotificationConsumer,
    OrderCreated,
};
use courier_kafka::memory::MemoryBroker;
use courier_kafka::{Consumer, Message, MessageValue, Producer, RetryConfig, RetryableConsumer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

const RETRY_TOPIC: &str = "orders-topic-retry";
const DLQ_TOPIC: &str = "orders-topic-dlq";

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("courier=debug,courier_kafka=debug")
        .try_init()
        .ok();
}

struct Pipeline {
    broker: MemoryBroker,
    sink: MemoryNotificationSink,
    producer: Arc<Producer>,
    service: ConsumerService,
}

fn pipeline(config: RetryConfig) -> Pipeline {
    let broker = MemoryBroker::new();
    let producer = Arc::new(Producer::with_sink(
        Arc::new(broker.sink()),
        "",
        Duration::from_secs(1),
    ));
    let consumer = RetryableConsumer::new(
        Consumer::with_source(Box::new(broker.source()), Duration::from_millis(100)),
        producer.clone(),
        Arc::new(broker.admin()),
        config,
    )
    .expect("valid retry config");

    let sink = MemoryNotificationSink::new();
    let service = ConsumerService::new(consumer).with_consumer(NotificationConsumer::new(
        Arc::new(sink.clone()),
        "localhost:8081",
    ));

    Pipeline {
        broker,
        sink,
        producer,
        service,
    }
}

fn order(id: &str) -> OrderCreated {
    OrderCreated {
        order_id: id.to_string(),
        user_id: format!("user-{id}"),
        amount: 25.0,
        status: "PENDING".to_string(),
    }
}

/// Run the service until `settled` holds (plus a grace period), then cancel it.
async fn run_until<F>(service: ConsumerService, settled: F) -> courier_kafka::SchedulerStats
where
    F: Fn() -> bool + Send + 'static,
{
    let shutdown = CancellationToken::new();
    let watcher = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let deadline = Instant::now() + Duration::from_secs(600);
            while !settled() && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            tokio::time::sleep(Duration::from_secs(120)).await;
            shutdown.cancel();
        })
    };

    let stats = assert_ok!(service.run(shutdown).await);
    watcher.await.unwrap();
    stats
}

#[tokio::test(start_paused = true)]
async fn test_notification_store_recovers_after_two_failures() {
    init_tracing();
    let Pipeline {
        broker,
        sink,
        producer,
        service,
    } = pipeline(RetryConfig::default());
    sink.fail_next(2);

    assert_ok!(publish_order_created(producer.as_ref(), &order("42")).await);

    let watched = sink.clone();
    let stats = run_until(service, move || !watched.notifications().is_empty()).await;

    let notifications = sink.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].link, "localhost:8081/order/42");
    assert_eq!(notifications[0].user_id, "user-42");

    let retries = broker.messages(RETRY_TOPIC);
    let counts: Vec<u32> = retries.iter().map(Message::retry_count).collect();
    assert_eq!(counts, vec![1, 2]);
    assert!(retries.iter().all(|m| m.key == "ORDER_CREATED_42"));
    assert!(broker.messages(DLQ_TOPIC).is_empty());

    assert_eq!(stats.scheduled, 2);
    assert_eq!(stats.published, 2);
    assert_eq!(stats.pending, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_store_dead_letters_the_order() {
    init_tracing();
    let Pipeline {
        broker,
        sink,
        producer,
        service,
    } = pipeline(RetryConfig::default());
    sink.fail_next(usize::MAX);

    assert_ok!(publish_order_created(producer.as_ref(), &order("42")).await);

    let watching = broker.clone();
    run_until(service, move || !watching.messages(DLQ_TOPIC).is_empty()).await;

    let counts: Vec<u32> = broker
        .messages(RETRY_TOPIC)
        .iter()
        .map(Message::retry_count)
        .collect();
    assert_eq!(counts, vec![1, 2, 3]);

    let dlq = broker.messages(DLQ_TOPIC);
    assert_eq!(dlq.len(), 1);
    let meta = dlq[0].value.meta.as_ref().unwrap();
    assert_eq!(meta.retry_count, 4);
    assert_eq!(meta.original_topic, ORDERS_TOPIC);
    assert_eq!(meta.original_key, "ORDER_CREATED_42");
    assert_eq!(meta.message_id, "ORDER_CREATED_42");
    assert_eq!(meta.service_id, "order-service");
    assert_eq!(
        meta.error_message,
        "Failed to create notification for order 42: notification store unavailable"
    );
    assert!(sink.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_foreign_message_code_ends_in_dlq() {
    let Pipeline {
        broker,
        sink,
        service,
        ..
    } = pipeline(RetryConfig {
        max_retry_attempts: 1,
        ..RetryConfig::default()
    });

    broker.append(
        ORDERS_TOPIC,
        "ORDER_CANCELLED_7",
        &MessageValue::new("ORDER_CANCELLED", json!({"order_id": "7"})),
    );

    let watching = broker.clone();
    run_until(service, move || !watching.messages(DLQ_TOPIC).is_empty()).await;

    assert_eq!(broker.messages(RETRY_TOPIC).len(), 1);
    let dlq = broker.messages(DLQ_TOPIC);
    let meta = dlq[0].value.meta.as_ref().unwrap();
    assert_eq!(meta.retry_count, 2);
    assert_eq!(
        meta.error_message,
        "Unexpected message code: expected ORDER_CREATED, got ORDER_CANCELLED"
    );
    assert!(sink.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_orders_keep_flowing_while_one_is_retried() {
    let Pipeline {
        broker,
        sink,
        producer,
        service,
    } = pipeline(RetryConfig::default());
    sink.fail_next(1);

    for id in ["1", "2", "3"] {
        assert_ok!(publish_order_created(producer.as_ref(), &order(id)).await);
    }

    let watched = sink.clone();
    let started = Instant::now();
    let notified_at = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorder = notified_at.clone();
    run_until(service, move || {
        let count = watched.notifications().len();
        let mut seen = recorder.lock().unwrap();
        if count > seen.len() {
            seen.push(started.elapsed());
        }
        count == 3
    })
    .await;

    let links: Vec<String> = sink.notifications().into_iter().map(|n| n.link).collect();
    assert_eq!(
        links,
        vec![
            "localhost:8081/order/2",
            "localhost:8081/order/3",
            "localhost:8081/order/1",
        ]
    );
    assert_eq!(broker.messages(RETRY_TOPIC).len(), 1);

    // Orders 2 and 3 were not held back by the two second backoff of order 1.
    let notified_at = notified_at.lock().unwrap();
    assert!(notified_at[0] < Duration::from_secs(1));
}
