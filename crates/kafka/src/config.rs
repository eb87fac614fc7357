//! Client configuration for producers, consumers and topic provisioning.

use rdkafka::config::ClientConfig;
use std::time::Duration;

/// Partition/replication profile of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
        }
    }
}

/// Configuration for the Kafka producer
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// `security.protocol`, left to the librdkafka default when empty
    pub security_protocol: String,
    /// Topic used when a published message has an empty topic
    pub default_topic: String,
    /// Local delivery timeout for a single record
    pub message_timeout: Duration,
    /// Bounded wait for outstanding records on close
    pub flush_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            security_protocol: String::new(),
            default_topic: String::new(),
            message_timeout: Duration::from_secs(30),
            flush_timeout: Duration::from_secs(15),
        }
    }
}

impl ProducerConfig {
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("acks", "all")
            .set(
                "message.timeout.ms",
                self.message_timeout.as_millis().to_string(),
            );
        if !self.security_protocol.is_empty() {
            config.set("security.protocol", &self.security_protocol);
        }
        config
    }
}

/// Configuration for the Kafka consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// `security.protocol`, left to the librdkafka default when empty
    pub security_protocol: String,
    /// Consumer group ID
    pub group_id: String,
    /// Auto offset reset strategy ("earliest" or "latest")
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    pub session_timeout_ms: u32,
    /// Heartbeat interval in milliseconds, lower than the session timeout
    pub heartbeat_interval_ms: u32,
    /// Maximum time between polls before the member leaves the group
    pub max_poll_interval_ms: u32,
    /// "range", "roundrobin" or "cooperative-sticky"
    pub partition_assignment_strategy: String,
    /// Enable auto commit of consumed offsets
    pub enable_auto_commit: bool,
    pub auto_commit_interval_ms: u32,
    /// How long a single poll waits for a record before reporting a timeout
    pub poll_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            security_protocol: String::new(),
            group_id: "courier-consumer".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 45000,
            heartbeat_interval_ms: 14000,
            max_poll_interval_ms: 300000,
            partition_assignment_strategy: "roundrobin".to_string(),
            enable_auto_commit: true,
            auto_commit_interval_ms: 5000,
            poll_timeout: Duration::from_millis(100),
        }
    }
}

impl ConsumerConfig {
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.auto.commit", self.enable_auto_commit.to_string())
            .set(
                "auto.commit.interval.ms",
                self.auto_commit_interval_ms.to_string(),
            )
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set(
                "heartbeat.interval.ms",
                self.heartbeat_interval_ms.to_string(),
            )
            .set("max.poll.interval.ms", self.max_poll_interval_ms.to_string())
            .set(
                "partition.assignment.strategy",
                &self.partition_assignment_strategy,
            )
            .set("enable.partition.eof", "false");
        if !self.security_protocol.is_empty() {
            config.set("security.protocol", &self.security_protocol);
        }
        config
    }
}

pub(crate) fn admin_config(brokers: &str, security_protocol: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", brokers);
    if !security_protocol.is_empty() {
        config.set("security.protocol", security_protocol);
    }
    config
}
