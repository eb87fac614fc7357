//! Kafka messaging for courier services.
//!
//! Features:
//!
//! - Producer: publishes one JSON-encoded message at a time and waits for its delivery report
//! - Consumer: a single poll loop dispatching messages to per-topic handlers
//! - Retries: failed messages go through a retry topic with backoff, then to a dead-letter topic
//! - Topic provisioning: idempotent creation of topics through the admin API
//!
//! Every broker interaction goes through the traits in [`broker`], so the whole
//! pipeline also runs against the in-process [`memory::MemoryBroker`].

pub mod admin;
pub mod broker;
pub mod config;

/// Poll loop with a topic to handler registry
pub mod consumer;
pub mod error;
pub mod memory;
pub mod producer;
pub mod retry;

// Re-export main types for easy access
pub use admin::KafkaTopicAdmin;
pub use broker::{InboundRecord, OutboundRecord, RecordSink, RecordSource, TopicAdmin};
pub use config::{ConsumerConfig, ProducerConfig, TopicConfig};
pub use consumer::{handler_fn, Consumer, Handler, KafkaRecordSource};
pub use error::{Error, Result};
pub use message_types::{Message, MessageValue, MetaData};
pub use producer::{KafkaRecordSink, MessagePublisher, Producer};
pub use retry::{RetryConfig, RetryableConsumer, SchedulerStats};
