use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Failed to decode message from topic {topic} (partition {partition}, offset {offset}): {source}")]
    Decode {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: message_types::MessageTypesError,
    },

    #[error("Failed to encode message for topic {topic}: {source}")]
    Encode {
        topic: String,
        #[source]
        source: message_types::MessageTypesError,
    },

    #[error("Handler already registered for topic: {0}")]
    HandlerAlreadyRegistered(String),

    #[error("No handlers registered, cannot start consumer")]
    NoHandlers,

    #[error("Consumer cancelled")]
    Cancelled,

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Message delivery to topic {topic} failed: {reason}")]
    Delivery { topic: String, reason: String },

    #[error("Message has no topic and no default topic is configured")]
    NoTopic,

    #[error("Producer is closed")]
    Closed,

    #[error("Topic creation error: {0}")]
    TopicCreation(String),

    #[error("Failed to register handler for {topic} after {attempts} attempts: {source}")]
    Registration {
        topic: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Retry scheduler is closed")]
    SchedulerClosed,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether repeating the same setup call can succeed.
    ///
    /// A duplicate registration is a programming error and never heals.
    pub fn is_retryable_setup_error(&self) -> bool {
        !matches!(
            self,
            Error::HandlerAlreadyRegistered(_) | Error::InvalidConfig(_) | Error::Closed
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
