use crate::config::TopicConfig;
use crate::error::{Error, Result};
use crate::retry::scheduler::RepublishPolicy;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Maps a retry attempt (1-based) to the delay before it is re-published.
pub type BackoffStrategy = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Configuration of the retry/DLQ pipeline
#[derive(Clone)]
pub struct RetryConfig {
    /// Appended to a business topic to name its retry topic
    pub retry_topic_suffix: String,
    /// Appended to a business topic to name its dead-letter topic
    pub dlq_topic_suffix: String,
    /// Number of retry-topic deliveries before a message is dead-lettered
    pub max_retry_attempts: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_factor: f64,
    /// Replaces the default formula when set; the result is still capped at `backoff_max`
    pub backoff_strategy: Option<BackoffStrategy>,
    /// Partition/replication profile of every retry and DLQ topic
    pub side_topic_partitions: i32,
    pub side_topic_replication: i32,
    /// Attempts at registering one handler before setup fails
    pub registration_attempts: u32,
    /// Delay after the first failed registration, doubled after each further failure
    pub registration_backoff: Duration,
    /// Delayed re-publishes allowed to wait at the same time
    pub max_pending_retries: usize,
    /// Attempts at a delayed re-publish before the message is counted as lost
    pub republish_attempts: u32,
    pub republish_backoff: Duration,
    pub republish_backoff_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_topic_suffix: "-retry".to_string(),
            dlq_topic_suffix: "-dlq".to_string(),
            max_retry_attempts: 3,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            backoff_factor: 2.0,
            backoff_strategy: None,
            side_topic_partitions: 3,
            side_topic_replication: 3,
            registration_attempts: 5,
            registration_backoff: Duration::from_secs(1),
            max_pending_retries: 10_000,
            republish_attempts: 3,
            republish_backoff: Duration::from_millis(100),
            republish_backoff_max: Duration::from_secs(2),
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("retry_topic_suffix", &self.retry_topic_suffix)
            .field("dlq_topic_suffix", &self.dlq_topic_suffix)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("backoff_initial", &self.backoff_initial)
            .field("backoff_max", &self.backoff_max)
            .field("backoff_factor", &self.backoff_factor)
            .field("custom_backoff", &self.backoff_strategy.is_some())
            .field("side_topic_partitions", &self.side_topic_partitions)
            .field("side_topic_replication", &self.side_topic_replication)
            .field("registration_attempts", &self.registration_attempts)
            .field("registration_backoff", &self.registration_backoff)
            .field("max_pending_retries", &self.max_pending_retries)
            .field("republish_attempts", &self.republish_attempts)
            .finish_non_exhaustive()
    }
}

impl RetryConfig {
    pub fn with_backoff_strategy<F>(mut self, strategy: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.backoff_strategy = Some(Arc::new(strategy));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_topic_suffix.is_empty() || self.dlq_topic_suffix.is_empty() {
            return Err(Error::InvalidConfig(
                "retry and DLQ topic suffixes must not be empty".to_string(),
            ));
        }
        if self.retry_topic_suffix == self.dlq_topic_suffix {
            return Err(Error::InvalidConfig(format!(
                "retry and DLQ topics share the suffix '{}'",
                self.retry_topic_suffix
            )));
        }
        if self.max_retry_attempts == 0 {
            return Err(Error::InvalidConfig(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "backoff_factor must be a positive number, got {}",
                self.backoff_factor
            )));
        }
        if self.backoff_initial > self.backoff_max {
            return Err(Error::InvalidConfig(format!(
                "backoff_initial ({:?}) exceeds backoff_max ({:?})",
                self.backoff_initial, self.backoff_max
            )));
        }
        if self.registration_attempts == 0
            || self.republish_attempts == 0
            || self.max_pending_retries == 0
        {
            return Err(Error::InvalidConfig(
                "registration_attempts, republish_attempts and max_pending_retries must be at least 1"
                    .to_string(),
            ));
        }
        if self.max_pending_retries > Semaphore::MAX_PERMITS {
            return Err(Error::InvalidConfig(format!(
                "max_pending_retries must be at most {}, got {}",
                Semaphore::MAX_PERMITS,
                self.max_pending_retries
            )));
        }
        Ok(())
    }

    /// Longest wait for pending retries on a graceful shutdown: the largest
    /// backoff delay plus every local re-publish attempt.
    pub fn drain_timeout(&self) -> Duration {
        let republish = self
            .republish_backoff_max
            .saturating_mul(self.republish_attempts);
        self.backoff_max.saturating_add(republish)
    }

    pub fn retry_topic(&self, topic: &str) -> String {
        format!("{topic}{}", self.retry_topic_suffix)
    }

    pub fn dlq_topic(&self, topic: &str) -> String {
        format!("{topic}{}", self.dlq_topic_suffix)
    }

    /// Retry and DLQ topics of `topic`, with the flat side-topic profile.
    pub fn side_topics(&self, topic: &str) -> Vec<TopicConfig> {
        vec![
            TopicConfig::new(
                self.retry_topic(topic),
                self.side_topic_partitions,
                self.side_topic_replication,
            ),
            TopicConfig::new(
                self.dlq_topic(topic),
                self.side_topic_partitions,
                self.side_topic_replication,
            ),
        ]
    }

    /// Delay before retry `attempt` is re-published.
    ///
    /// The default is `min(initial * attempt * factor, max)`: linear in the attempt
    /// number, not `initial * factor^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = match &self.backoff_strategy {
            Some(strategy) => strategy(attempt),
            None => {
                let scale = f64::from(attempt) * self.backoff_factor;
                Duration::try_from_secs_f64(self.backoff_initial.as_secs_f64() * scale)
                    .unwrap_or(self.backoff_max)
            }
        };
        delay.min(self.backoff_max)
    }

    /// Delay before the given registration attempt is repeated: 1s, 2s, 4s, ...
    pub(crate) fn registration_delay(&self, attempt: u32) -> Duration {
        self.registration_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    pub(crate) fn republish_policy(&self) -> RepublishPolicy {
        RepublishPolicy {
            attempts: self.republish_attempts,
            backoff: self.republish_backoff,
            backoff_max: self.republish_backoff_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_table() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(1), Duration::from_secs(2));
        assert_eq!(config.backoff(2), Duration::from_secs(4));
        assert_eq!(config.backoff(3), Duration::from_secs(6));
        assert_eq!(config.backoff(30), Duration::from_secs(60));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_fractional_factor() {
        let config = RetryConfig {
            backoff_initial: Duration::from_millis(500),
            backoff_factor: 1.5,
            ..RetryConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(750));
        assert_eq!(config.backoff(2), Duration::from_millis(1500));
    }

    #[test]
    fn test_custom_strategy_is_capped() {
        let config = RetryConfig::default().with_backoff_strategy(|attempt| {
            Duration::from_secs(u64::from(attempt) * 100)
        });
        assert_eq!(config.backoff(0), Duration::ZERO);
        assert_eq!(config.backoff(1), Duration::from_secs(60));
    }

    #[test]
    fn test_topic_names() {
        let config = RetryConfig::default();
        assert_eq!(config.retry_topic("orders-topic"), "orders-topic-retry");
        assert_eq!(config.dlq_topic("orders-topic"), "orders-topic-dlq");

        let side = config.side_topics("orders-topic");
        assert_eq!(side[0], TopicConfig::new("orders-topic-retry", 3, 3));
        assert_eq!(side[1], TopicConfig::new("orders-topic-dlq", 3, 3));
    }

    #[test]
    fn test_registration_delays_double_from_one_second() {
        let config = RetryConfig::default();
        let delays: Vec<u64> = (1..=4)
            .map(|attempt| config.registration_delay(attempt).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_drain_timeout_covers_longest_retry() {
        let config = RetryConfig::default();
        assert_eq!(config.drain_timeout(), Duration::from_secs(60 + 3 * 2));
    }

    #[test]
    fn test_validate() {
        assert!(RetryConfig::default().validate().is_ok());

        let invalid = [
            RetryConfig {
                retry_topic_suffix: String::new(),
                ..RetryConfig::default()
            },
            RetryConfig {
                dlq_topic_suffix: "-retry".to_string(),
                ..RetryConfig::default()
            },
            RetryConfig {
                max_retry_attempts: 0,
                ..RetryConfig::default()
            },
            RetryConfig {
                backoff_factor: f64::NAN,
                ..RetryConfig::default()
            },
            RetryConfig {
                backoff_factor: 0.0,
                ..RetryConfig::default()
            },
            RetryConfig {
                backoff_initial: Duration::from_secs(120),
                ..RetryConfig::default()
            },
            RetryConfig {
                max_pending_retries: 0,
                ..RetryConfig::default()
            },
            RetryConfig {
                max_pending_retries: usize::MAX,
                ..RetryConfig::default()
            },
        ];
        for config in invalid {
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfig(_))),
                "{config:?} should be rejected"
            );
        }
    }
}
