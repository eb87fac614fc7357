//! Command-line configuration shared by the subcommands.
//!
//! Each group of flags is a clap `Args` struct with environment fallbacks and
//! converts into the matching `courier_kafka` config.

mod duration;

pub use duration::parse_duration;

use clap::Args;
use courier_kafka::{ConsumerConfig, ProducerConfig, RetryConfig, TopicConfig};
use std::time::Duration;

/// Kafka connection arguments.
#[derive(Args, Clone, Debug)]
pub struct KafkaArgs {
    /// Kafka brokers (comma-separated, e.g., "localhost:9092")
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    pub kafka_brokers: String,

    /// Kafka security protocol (e.g., "SASL_SSL"); librdkafka default when empty
    #[arg(long, env = "KAFKA_SECURITY_PROTOCOL", default_value = "")]
    pub kafka_security_protocol: String,

    /// Topic for messages published without one
    #[arg(long, env = "KAFKA_DEFAULT_TOPIC", default_value = "")]
    pub kafka_default_topic: String,

    /// Local delivery timeout of a single record
    #[arg(long, env = "KAFKA_MESSAGE_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub kafka_message_timeout: Duration,
}

impl KafkaArgs {
    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            brokers: self.kafka_brokers.clone(),
            security_protocol: self.kafka_security_protocol.clone(),
            default_topic: self.kafka_default_topic.clone(),
            message_timeout: self.kafka_message_timeout,
            ..ProducerConfig::default()
        }
    }
}

/// Consumer group arguments.
#[derive(Args, Clone, Debug)]
pub struct ConsumerArgs {
    /// Consumer group ID
    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "customer-service")]
    pub group_id: String,

    /// Where to start without a committed offset ("earliest" or "latest")
    #[arg(long, env = "KAFKA_AUTO_OFFSET_RESET", default_value = "earliest")]
    pub auto_offset_reset: String,

    /// How long one poll waits for a record
    #[arg(long, default_value = "100ms", value_parser = parse_duration)]
    pub poll_timeout: Duration,
}

impl ConsumerArgs {
    pub fn consumer_config(&self, kafka: &KafkaArgs) -> ConsumerConfig {
        ConsumerConfig {
            brokers: kafka.kafka_brokers.clone(),
            security_protocol: kafka.kafka_security_protocol.clone(),
            group_id: self.group_id.clone(),
            auto_offset_reset: self.auto_offset_reset.clone(),
            poll_timeout: self.poll_timeout,
            ..ConsumerConfig::default()
        }
    }
}

/// Retry and dead-letter arguments.
#[derive(Args, Clone, Debug)]
pub struct RetryArgs {
    /// Retry-topic deliveries before a message is dead-lettered
    #[arg(long, env = "KAFKA_MAX_RETRY_ATTEMPTS", default_value = "3")]
    pub max_retry_attempts: u32,

    /// Backoff base; retry n waits min(initial * n * factor, max)
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub retry_backoff_initial: Duration,

    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    pub retry_backoff_max: Duration,

    #[arg(long, default_value = "2.0")]
    pub retry_backoff_factor: f64,

    #[arg(long, default_value = "-retry", allow_hyphen_values = true)]
    pub retry_topic_suffix: String,

    #[arg(long, default_value = "-dlq", allow_hyphen_values = true)]
    pub dlq_topic_suffix: String,

    /// Retries allowed to wait for their delay at the same time
    #[arg(long, default_value = "10000")]
    pub max_pending_retries: usize,
}

impl RetryArgs {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            retry_topic_suffix: self.retry_topic_suffix.clone(),
            dlq_topic_suffix: self.dlq_topic_suffix.clone(),
            max_retry_attempts: self.max_retry_attempts,
            backoff_initial: self.retry_backoff_initial,
            backoff_max: self.retry_backoff_max,
            backoff_factor: self.retry_backoff_factor,
            max_pending_retries: self.max_pending_retries,
            ..RetryConfig::default()
        }
    }
}

/// Partition/replication profile of a business topic.
#[derive(Args, Clone, Debug)]
pub struct TopicArgs {
    /// Business topic to create
    #[arg(long, default_value = crate::orders::ORDERS_TOPIC)]
    pub topic: String,

    #[arg(long, default_value = "3")]
    pub partitions: i32,

    #[arg(long, default_value = "1")]
    pub replication_factor: i32,

    /// Skip the retry and DLQ topics
    #[arg(long)]
    pub without_side_topics: bool,
}

impl TopicArgs {
    /// The business topic, followed by its retry and DLQ topics unless disabled.
    pub fn topics(&self, retry: &RetryConfig) -> Vec<TopicConfig> {
        let mut topics = vec![TopicConfig::new(
            &self.topic,
            self.partitions,
            self.replication_factor,
        )];
        if !self.without_side_topics {
            topics.extend(retry.side_topics(&self.topic));
        }
        topics
    }
}
