//! Turns `ORDER_CREATED` events into user notifications.
//!
//! Persisting and pushing notifications happens behind [`NotificationSink`].

use crate::consumer_service::ConsumerSetup;
use crate::orders::{OrderCreated, ORDERS_TOPIC, ORDER_CREATED};
use anyhow::Context;
use courier_kafka::RetryableConsumer;
use message_types::Message;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Notification topic for created orders.
pub const ORDER_CREATED_NOTIFICATION: &str = "order-created";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateNotificationRequest {
    pub topic: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub user_id: String,
}

/// Stores a notification and delivers it to the user.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create_notification(&self, request: CreateNotificationRequest) -> anyhow::Result<()>;
}

/// Sink that only logs the notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait::async_trait]
impl NotificationSink for LogNotificationSink {
    async fn create_notification(&self, request: CreateNotificationRequest) -> anyhow::Result<()> {
        info!(
            "Notification for user {}: {} ({})",
            request.user_id, request.title, request.link
        );
        Ok(())
    }
}

#[derive(Default)]
struct MemorySinkState {
    notifications: Vec<CreateNotificationRequest>,
    failures_left: usize,
}

/// Sink keeping notifications in memory, optionally failing the first calls.
#[derive(Default, Clone)]
pub struct MemoryNotificationSink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` notifications.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_left = count;
    }

    pub fn notifications(&self) -> Vec<CreateNotificationRequest> {
        self.lock().notifications.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn create_notification(&self, request: CreateNotificationRequest) -> anyhow::Result<()> {
        let mut state = self.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            anyhow::bail!("notification store unavailable");
        }
        state.notifications.push(request);
        Ok(())
    }
}

/// Consumer of `orders-topic` raising an "Order Created" notification per order.
#[derive(Clone)]
pub struct NotificationConsumer {
    sink: Arc<dyn NotificationSink>,
    link_base: String,
}

impl NotificationConsumer {
    /// `link_base` prefixes the order link, e.g. `localhost:8081`.
    pub fn new(sink: Arc<dyn NotificationSink>, link_base: impl Into<String>) -> Self {
        Self {
            sink,
            link_base: link_base.into(),
        }
    }

    pub fn notification_for(&self, order: &OrderCreated) -> CreateNotificationRequest {
        CreateNotificationRequest {
            topic: ORDER_CREATED_NOTIFICATION.to_string(),
            title: "Order Created".to_string(),
            description: "Order created successfully".to_string(),
            link: format!("{}/order/{}", self.link_base, order.order_id),
            user_id: order.user_id.clone(),
        }
    }

    /// Handle one message; any error sends it down the retry path.
    pub async fn handle(&self, message: Message) -> anyhow::Result<()> {
        debug!(
            "Processing order: key: {}, topic: {}, partition: {}, offset: {}",
            message.key, message.topic, message.partition, message.offset
        );

        message.value.expect_code(ORDER_CREATED)?;
        let order: OrderCreated = message.value.decode_payload()?;

        self.sink
            .create_notification(self.notification_for(&order))
            .await
            .with_context(|| format!("Failed to create notification for order {}", order.order_id))
    }
}

#[async_trait::async_trait]
impl ConsumerSetup for NotificationConsumer {
    fn name(&self) -> &str {
        "notification"
    }

    async fn setup(&self, consumer: &mut RetryableConsumer) -> anyhow::Result<()> {
        let this = self.clone();
        consumer
            .register_handler(ORDERS_TOPIC, move |message| {
                let this = this.clone();
                async move { this.handle(message).await }
            })
            .await
            .context("Failed to register order notification handler")
    }
}
