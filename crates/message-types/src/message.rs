//! Message envelope types.

use crate::error::{MessageTypesError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A message as seen by producers and handlers.
///
/// `partition` and `offset` are consumer-side provenance and are ignored on publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Record key, used for partitioning and correlation
    pub key: String,
    /// Destination topic on publish, origin topic on consumption
    pub topic: String,
    /// Partition the message was read from
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Serialized as the record value
    pub value: MessageValue,
}

impl Message {
    /// Create a message for publishing.
    pub fn new(topic: impl Into<String>, key: impl Into<String>, value: MessageValue) -> Self {
        Self {
            key: key.into(),
            topic: topic.into(),
            partition: 0,
            offset: 0,
            value,
        }
    }

    /// Number of failed attempts recorded in the metadata (0 if none).
    pub fn retry_count(&self) -> u32 {
        self.value.meta.as_ref().map_or(0, |meta| meta.retry_count)
    }

    /// Metadata of this message, created empty if absent.
    pub fn meta_mut(&mut self) -> &mut MetaData {
        self.value.meta.get_or_insert_with(MetaData::default)
    }

    /// Copy of this message addressed to another topic.
    ///
    /// Key, payload and metadata are kept; provenance is reset.
    pub fn forward_to(&self, topic: impl Into<String>) -> Self {
        Self::new(topic, self.key.clone(), self.value.clone())
    }
}

/// The record value: metadata, schema tag and opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageValue {
    #[serde(default)]
    pub meta: Option<MetaData>,
    #[serde(default)]
    pub message_code: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl MessageValue {
    pub fn new(message_code: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            meta: None,
            message_code: message_code.into(),
            payload,
        }
    }

    /// Build a value from a typed payload.
    pub fn encode<T: Serialize>(message_code: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::new(message_code, serde_json::to_value(payload)?))
    }

    /// Attach metadata.
    pub fn with_meta(mut self, meta: MetaData) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Decode the payload into the type the handler expects.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|source| {
            MessageTypesError::PayloadDecode {
                code: self.message_code.clone(),
                source,
            }
        })
    }

    /// Fail unless this value carries the given message code.
    pub fn expect_code(&self, expected: &str) -> Result<()> {
        if self.message_code == expected {
            Ok(())
        } else {
            Err(MessageTypesError::UnexpectedCode {
                expected: expected.to_string(),
                actual: self.message_code.clone(),
            })
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Producer and retry bookkeeping carried inside the value.
///
/// Every field is optional on the wire. The retry fields are only written by the
/// retry pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    #[serde(default)]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_message_id: String,
    #[serde(default)]
    pub service_id: String,
    /// Publish time in nanoseconds since the Unix epoch, set by the producer
    #[serde(default)]
    pub timestamp: i64,

    /// Number of failed attempts so far
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_count: u32,
    /// Business topic the message belongs to, whichever topic it currently sits in
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_topic: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_key: String,
    /// Last failure reason
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

impl MetaData {
    /// Metadata with a fresh random message id.
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            service_id: service_id.into(),
            ..Default::default()
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}
