//! At-least-once consumption on top of [`crate::Consumer`].
//!
//! A message whose handler fails is re-published to `<topic>-retry` after a
//! backoff delay, with `meta.retry_count` counting the failed attempts. Once the
//! count would exceed `max_retry_attempts` the message goes to `<topic>-dlq` and
//! is never handled again.

pub mod config;
pub mod consumer;
pub mod scheduler;

pub use config::{BackoffStrategy, RetryConfig};
pub use consumer::RetryableConsumer;
pub use scheduler::{RepublishPolicy, RetryScheduler, SchedulerStats};
