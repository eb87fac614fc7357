//! Topic provisioning.

use crate::broker::TopicAdmin;
use crate::config::{admin_config, TopicConfig};
use crate::error::{Error, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;
use std::time::Duration;
use tracing::{debug, info};

/// Operation timeout for topic creation requests.
pub const CREATE_TOPICS_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates topics through the Kafka admin API.
pub struct KafkaTopicAdmin {
    client: AdminClient<DefaultClientContext>,
}

impl KafkaTopicAdmin {
    pub fn new(brokers: &str, security_protocol: &str) -> Result<Self> {
        let client: AdminClient<DefaultClientContext> = admin_config(brokers, security_protocol)
            .create()
            .map_err(|e| Error::TopicCreation(format!("Failed to create admin client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl TopicAdmin for KafkaTopicAdmin {
    async fn ensure_topics(&self, topics: &[TopicConfig]) -> Result<()> {
        if topics.is_empty() {
            return Ok(());
        }

        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|topic| {
                NewTopic::new(
                    &topic.name,
                    topic.partitions,
                    TopicReplication::Fixed(topic.replication_factor),
                )
            })
            .collect();
        let opts = AdminOptions::new().operation_timeout(Some(CREATE_TOPICS_TIMEOUT));

        let results = self
            .client
            .create_topics(&new_topics, &opts)
            .await
            .map_err(|e| Error::TopicCreation(format!("Failed to create topics: {e}")))?;

        for result in results {
            match result {
                Ok(topic_name) => {
                    info!(
                        "Created topic '{}' with {} partitions",
                        topic_name,
                        partitions_for(&topic_name, topics)
                    );
                }
                Err((topic_name, code)) if is_already_exists(code) => {
                    info!("Topic '{}' already exists", topic_name);
                }
                Err((topic_name, code)) => {
                    return Err(Error::TopicCreation(format!(
                        "Failed to create topic {topic_name}: {code}"
                    )));
                }
            }
        }

        debug!("Ensured {} topics", topics.len());
        Ok(())
    }
}

fn is_already_exists(code: RDKafkaErrorCode) -> bool {
    code == RDKafkaErrorCode::TopicAlreadyExists
}

fn partitions_for(name: &str, topics: &[TopicConfig]) -> i32 {
    topics
        .iter()
        .find(|topic| topic.name == name)
        .map_or(1, |topic| topic.partitions)
}
