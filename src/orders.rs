//! Order events published by the order service.

use anyhow::Context;
use courier_kafka::MessagePublisher;
use message_types::{Message, MessageValue, MetaData};
use serde::{Deserialize, Serialize};

/// Topic carrying order lifecycle events.
pub const ORDERS_TOPIC: &str = "orders-topic";

/// Message code of [`OrderCreated`].
pub const ORDER_CREATED: &str = "ORDER_CREATED";

/// Service id stamped on every order event.
pub const ORDER_SERVICE_ID: &str = "order-service";

/// Payload of an `ORDER_CREATED` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: String,
    pub user_id: String,
    pub amount: f64,
    pub status: String,
}

impl OrderCreated {
    /// Key and message id of the event: `ORDER_CREATED_<order_id>`.
    pub fn event_id(&self) -> String {
        format!("{ORDER_CREATED}_{}", self.order_id)
    }
}

/// Build the `ORDER_CREATED` message for `orders-topic`.
pub fn order_created_message(order: &OrderCreated) -> anyhow::Result<Message> {
    let event_id = order.event_id();
    let value = MessageValue::encode(ORDER_CREATED, order)
        .with_context(|| format!("Failed to encode order {}", order.order_id))?
        .with_meta(MetaData::new(ORDER_SERVICE_ID).with_message_id(&event_id));

    Ok(Message::new(ORDERS_TOPIC, event_id, value))
}

/// Publish an `ORDER_CREATED` event and wait for the broker to acknowledge it.
pub async fn publish_order_created(
    publisher: &dyn MessagePublisher,
    order: &OrderCreated,
) -> anyhow::Result<()> {
    let message = order_created_message(order)?;
    publisher
        .publish(message)
        .await
        .with_context(|| format!("Failed to publish order {} to {ORDERS_TOPIC}", order.order_id))?;

    tracing::info!("Published {} for user {}", order.event_id(), order.user_id);
    Ok(())
}
