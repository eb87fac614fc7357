//! In-process broker for tests and local simulation.
//!
//! Every topic is a single partition (0) with offsets counting from zero. Each
//! [`MemorySource`] acts as its own consumer group and starts at the earliest
//! offset. Failure injection counters let tests exercise the error paths of the
//! producer, consumer and provisioner without a Kafka cluster.

use crate::broker::{InboundRecord, OutboundRecord, RecordSink, RecordSource, TopicAdmin};
use crate::config::TopicConfig;
use crate::error::{Error, Result};
use message_types::{Message, MessageValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Default)]
struct BrokerState {
    logs: BTreeMap<String, Vec<StoredRecord>>,
    next_sequence: u64,
    topics: BTreeMap<String, TopicConfig>,
    failing_sends: usize,
    failing_polls: usize,
    failing_subscribes: usize,
    failing_topic_creations: usize,
    flushes: usize,
}

struct StoredRecord {
    sequence: u64,
    record: InboundRecord,
}

impl BrokerState {
    fn append(&mut self, topic: &str, key: Option<Vec<u8>>, payload: Option<Vec<u8>>) -> i64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let log = self.logs.entry(topic.to_string()).or_default();
        let offset = log.len() as i64;
        log.push(StoredRecord {
            sequence,
            record: InboundRecord {
                topic: topic.to_string(),
                partition: 0,
                offset,
                key,
                payload,
            },
        });
        offset
    }
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

/// Shared in-memory broker. Clones refer to the same logs.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    appended: Arc<watch::Sender<u64>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            appended: Arc::new(appended),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_appended(&self) {
        self.appended.send_modify(|count| *count += 1);
    }

    pub fn sink(&self) -> MemorySink {
        MemorySink {
            broker: self.clone(),
        }
    }

    /// A fresh consumer positioned at the start of every topic.
    pub fn source(&self) -> MemorySource {
        MemorySource {
            broker: self.clone(),
            state: Mutex::new(SourceState::default()),
        }
    }

    pub fn admin(&self) -> MemoryAdmin {
        MemoryAdmin {
            broker: self.clone(),
        }
    }

    /// Append an encoded value directly, bypassing any producer.
    pub fn append(&self, topic: &str, key: &str, value: &MessageValue) -> i64 {
        let payload = value.to_bytes().unwrap_or_default();
        self.append_raw(topic, Some(key.as_bytes().to_vec()), Some(payload))
    }

    /// Append raw bytes, for example a value no consumer can decode.
    pub fn append_raw(&self, topic: &str, key: Option<Vec<u8>>, payload: Option<Vec<u8>>) -> i64 {
        let offset = self.lock().append(topic, key, payload);
        self.notify_appended();
        offset
    }

    pub fn records(&self, topic: &str) -> Vec<InboundRecord> {
        self.lock()
            .logs
            .get(topic)
            .map(|log| log.iter().map(|stored| stored.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Decoded messages of a topic in offset order. Undecodable records are skipped.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.records(topic)
            .into_iter()
            .filter_map(|record| {
                let value = MessageValue::from_bytes(record.payload.as_deref()?).ok()?;
                Some(Message {
                    key: record
                        .key
                        .map(|k| String::from_utf8_lossy(&k).into_owned())
                        .unwrap_or_default(),
                    topic: record.topic,
                    partition: record.partition,
                    offset: record.offset,
                    value,
                })
            })
            .collect()
    }

    /// Topics created through [`MemoryAdmin`].
    pub fn created_topics(&self) -> Vec<TopicConfig> {
        self.lock().topics.values().cloned().collect()
    }

    pub fn fail_next_sends(&self, count: usize) {
        self.lock().failing_sends = count;
    }

    pub fn fail_next_polls(&self, count: usize) {
        self.lock().failing_polls = count;
    }

    pub fn fail_next_subscribes(&self, count: usize) {
        self.lock().failing_subscribes = count;
    }

    pub fn fail_next_topic_creations(&self, count: usize) {
        self.lock().failing_topic_creations = count;
    }

    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }
}

/// Producer side of a [`MemoryBroker`].
pub struct MemorySink {
    broker: MemoryBroker,
}

#[async_trait::async_trait]
impl RecordSink for MemorySink {
    async fn send(&self, record: OutboundRecord) -> Result<()> {
        {
            let mut state = self.broker.lock();
            if take_failure(&mut state.failing_sends) {
                return Err(Error::Delivery {
                    topic: record.topic,
                    reason: "injected delivery failure".to_string(),
                });
            }
            let offset = state.append(&record.topic, Some(record.key), Some(record.payload));
            debug!("Appended record to {} at offset {}", record.topic, offset);
        }
        self.broker.notify_appended();
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<()> {
        self.broker.lock().flushes += 1;
        Ok(())
    }
}

#[derive(Default)]
struct SourceState {
    subscription: Vec<String>,
    positions: HashMap<String, usize>,
    closed: bool,
}

/// Consumer side of a [`MemoryBroker`].
pub struct MemorySource {
    broker: MemoryBroker,
    state: Mutex<SourceState>,
}

impl MemorySource {
    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the oldest unread record across the subscribed topics.
    fn next_record(&self) -> Result<Option<InboundRecord>> {
        let mut source = self.lock();
        if source.closed {
            return Err(Error::Consumer("memory source is closed".to_string()));
        }

        let mut broker = self.broker.lock();
        if take_failure(&mut broker.failing_polls) {
            return Err(Error::Consumer("injected poll failure".to_string()));
        }

        let next = source
            .subscription
            .iter()
            .filter_map(|topic| {
                let position = source.positions.get(topic).copied().unwrap_or(0);
                let stored = broker.logs.get(topic)?.get(position)?;
                Some((stored.sequence, topic.clone(), stored.record.clone()))
            })
            .min_by_key(|(sequence, _, _)| *sequence);

        Ok(next.map(|(_, topic, record)| {
            *source.positions.entry(topic).or_insert(0) += 1;
            record
        }))
    }
}

#[async_trait::async_trait]
impl RecordSource for MemorySource {
    async fn subscribe(&self, topics: &[String]) -> Result<()> {
        if take_failure(&mut self.broker.lock().failing_subscribes) {
            return Err(Error::Consumer("injected subscribe failure".to_string()));
        }
        self.lock().subscription = topics.to_vec();
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<InboundRecord>> {
        let deadline = tokio::time::Instant::now() + timeout;
        // Subscribing before checking means no append can slip in unnoticed.
        let mut appended = self.broker.appended.subscribe();

        loop {
            if let Some(record) = self.next_record()? {
                return Ok(Some(record));
            }
            match tokio::time::timeout_at(deadline, appended.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Ok(None),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

/// Topic provisioner of a [`MemoryBroker`].
pub struct MemoryAdmin {
    broker: MemoryBroker,
}

#[async_trait::async_trait]
impl TopicAdmin for MemoryAdmin {
    async fn ensure_topics(&self, topics: &[TopicConfig]) -> Result<()> {
        let mut state = self.broker.lock();
        if take_failure(&mut state.failing_topic_creations) {
            return Err(Error::TopicCreation(
                "injected topic creation failure".to_string(),
            ));
        }

        for topic in topics {
            if state.topics.contains_key(&topic.name) {
                info!("Topic '{}' already exists", topic.name);
                continue;
            }
            info!(
                "Created topic '{}' with {} partitions",
                topic.name, topic.partitions
            );
            state.topics.insert(topic.name.clone(), topic.clone());
        }
        Ok(())
    }
}
