//! Message envelope shared by the courier producer, consumers and retry pipeline.
//!
//! The envelope is transport-level: the core never looks inside `payload`.
//! Application handlers decode it with [`MessageValue::decode_payload`], using
//! `message_code` as the schema tag.
//!
//! # Wire format
//!
//! Only [`MessageValue`] travels as the record value (JSON). `key` travels as the
//! record key, and `topic`/`partition`/`offset` come from the broker on consumption.
//!
//! ```text
//! {
//!   "meta": { "message_id": "...", "service_id": "...", "timestamp": 0,
//!             "retry_count": 1, "original_topic": "...", "error_message": "..." },
//!   "message_code": "ORDER_CREATED",
//!   "payload": { ... }
//! }
//! ```

pub mod error;
pub mod message;

pub use error::{MessageTypesError, Result};
pub use message::{Message, MessageValue, MetaData};
