//! Raw-record seams between the message pipeline and a broker client.
//!
//! The producer, consumer and topic provisioner are written against these traits.
//! `rdkafka` implementations live next to each component; [`crate::memory`]
//! implements all three in process.

use crate::config::TopicConfig;
use crate::error::Result;
use std::time::Duration;

/// A record on its way to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// A record read from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

/// Writes single records and waits for their delivery report.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Submit one record and wait until the broker acknowledges or rejects it.
    async fn send(&self, record: OutboundRecord) -> Result<()>;

    /// Wait up to `timeout` for buffered records to be delivered.
    async fn flush(&self, timeout: Duration) -> Result<()>;
}

/// Reads records from the subscribed topics.
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    /// Replace the subscription with exactly `topics`.
    async fn subscribe(&self, topics: &[String]) -> Result<()>;

    /// Wait up to `timeout` for the next record.
    ///
    /// `Ok(None)` means the wait timed out, which is not an error.
    async fn poll(&self, timeout: Duration) -> Result<Option<InboundRecord>>;

    /// Leave the group and release the client.
    async fn close(&self) -> Result<()>;
}

/// Creates topics.
#[async_trait::async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Make sure every topic exists. A topic that already exists is not an error.
    async fn ensure_topics(&self, topics: &[TopicConfig]) -> Result<()>;
}
