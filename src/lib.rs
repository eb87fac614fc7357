//! Courier Library
//!
//! Order events and the customer-side notification consumer, built on the
//! retryable Kafka pipeline in `courier-kafka`.
//!
//! # Features
//!
//! - Order events: `ORDER_CREATED` messages on `orders-topic`
//! - Notifications: one "Order Created" notification per order, retried and dead-lettered on failure
//! - Consumer service: runs every consumer's setup, then the shared poll loop
//! - Simulation: the whole pipeline against an in-memory broker
//!
//! # CLI Usage
//!
//! ```bash
//! # Create orders-topic with its retry and DLQ topics
//! courier create-topics --kafka-brokers localhost:9092 --partitions 3
//!
//! # Publish an order event
//! courier publish --order-id 42 --user-id user-7 --amount 99.5
//!
//! # Consume orders and raise notifications until Ctrl-C
//! courier consume --group-id customer-service --link-base localhost:8081
//!
//! # Run the pipeline in memory, failing the first three notifications
//! courier simulate --orders 5 --failing-notifications 3
//! ```

pub mod config;
pub mod consumer_service;
pub mod notification;
pub mod orders;
pub mod simulate;

pub use config::{ConsumerArgs, KafkaArgs, RetryArgs, TopicArgs};
pub use consumer_service::{ConsumerService, ConsumerSetup};
pub use notification::{
    CreateNotificationRequest, LogNotificationSink, MemoryNotificationSink, NotificationConsumer,
    NotificationSink,
};
pub use orders::{order_created_message, publish_order_created, OrderCreated};
