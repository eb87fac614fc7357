//! Order notification pipeline tests
//!
//! Drive the notification consumer through the retryable consumer on an
//! in-memory broker. Time is paused, so backoff delays elapse instantly.

mod notification_retry;
mod simulation;
