use crate::error::{Error, Result};
use crate::producer::MessagePublisher;
use message_types::Message;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Bounded local retry of a delayed re-publish.
#[derive(Debug, Clone, Copy)]
pub struct RepublishPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub backoff_max: Duration,
}

impl RepublishPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.backoff_max)
    }
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    published: AtomicU64,
    republish_failures: AtomicU64,
    lost: AtomicU64,
    cancelled: AtomicU64,
}

/// Snapshot of the scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Retries waiting for their delay or being published
    pub pending: usize,
    pub scheduled: u64,
    pub published: u64,
    /// Failed publish attempts, including ones that later succeeded
    pub republish_failures: u64,
    /// Retries given up after every publish attempt failed
    pub lost: u64,
    /// Retries dropped by shutdown before their delay elapsed
    pub cancelled: u64,
}

/// Publishes messages after a delay without blocking the caller's poll loop.
///
/// Every scheduled retry is a tracked task holding one of `max_pending` permits.
/// When all permits are taken, [`RetryScheduler::schedule`] waits, which applies
/// backpressure to the consumer that failed the message.
pub struct RetryScheduler {
    publisher: Arc<dyn MessagePublisher>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    counters: Arc<Counters>,
    policy: RepublishPolicy,
}

impl RetryScheduler {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        max_pending: usize,
        policy: RepublishPolicy,
    ) -> Self {
        Self {
            publisher,
            permits: Arc::new(Semaphore::new(max_pending)),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
            policy,
        }
    }

    /// Publish `message` once `delay` has elapsed.
    ///
    /// Returns as soon as the retry is scheduled. Fails with
    /// [`Error::SchedulerClosed`] after [`drain`](Self::drain) or
    /// [`shutdown`](Self::shutdown).
    pub async fn schedule(&self, message: Message, delay: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SchedulerClosed);
        }

        let permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| Error::SchedulerClosed)?
            }
            _ = self.shutdown.cancelled() => return Err(Error::SchedulerClosed),
        };

        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Scheduled message {} for {} in {:?}",
            message.key, message.topic, delay
        );

        let publisher = Arc::clone(&self.publisher);
        let counters = Arc::clone(&self.counters);
        let shutdown = self.shutdown.clone();
        let policy = self.policy;

        self.tracker.spawn(async move {
            let _permit = permit;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    counters.cancelled.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Dropped pending retry of message {} for {} on shutdown",
                        message.key, message.topic
                    );
                }
                _ = tokio::time::sleep(delay) => {
                    publish_with_retry(publisher.as_ref(), message, policy, &counters).await;
                }
            }
        });

        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed() || self.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pending: self.pending(),
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            republish_failures: self.counters.republish_failures.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting retries and wait until every pending one has fired.
    ///
    /// The scheduler stays closed afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        info!("Draining {} pending retries", self.pending());
        self.tracker.wait().await;
    }

    /// Drop retries still waiting for their delay and wait for in-flight publishes.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        let stats = self.stats();
        info!(
            "Retry scheduler stopped: {} published, {} lost, {} cancelled",
            stats.published, stats.lost, stats.cancelled
        );
    }
}

async fn publish_with_retry(
    publisher: &dyn MessagePublisher,
    message: Message,
    policy: RepublishPolicy,
    counters: &Counters,
) {
    let topic = message.topic.clone();
    let key = message.key.clone();

    for attempt in 1..=policy.attempts {
        match publisher.publish(message.clone()).await {
            Ok(()) => {
                counters.published.fetch_add(1, Ordering::Relaxed);
                debug!("Published retry of message {} to {}", key, topic);
                return;
            }
            Err(e) if attempt < policy.attempts => {
                counters.republish_failures.fetch_add(1, Ordering::Relaxed);
                let delay = policy.delay(attempt);
                warn!(
                    "Failed to send message {} to retry topic {} (attempt {}/{}), retrying in {:?}: {}",
                    key, topic, attempt, policy.attempts, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                counters.republish_failures.fetch_add(1, Ordering::Relaxed);
                counters.lost.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Failed to send message {} to retry topic {} after {} attempts, message lost: {}",
                    key, topic, policy.attempts, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use crate::producer::Producer;
    use message_types::MessageValue;
    use serde_json::json;

    const POLICY: RepublishPolicy = RepublishPolicy {
        attempts: 3,
        backoff: Duration::from_millis(100),
        backoff_max: Duration::from_secs(2),
    };

    fn scheduler(broker: &MemoryBroker, max_pending: usize) -> RetryScheduler {
        let producer = Producer::with_sink(Arc::new(broker.sink()), "", Duration::from_secs(1));
        RetryScheduler::new(Arc::new(producer), max_pending, POLICY)
    }

    fn retry_message(key: &str) -> Message {
        Message::new("orders-topic-retry", key, MessageValue::new("X", json!({})))
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_after_delay() {
        let broker = MemoryBroker::new();
        let scheduler = scheduler(&broker, 10);

        scheduler
            .schedule(retry_message("k1"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(broker.messages("orders-topic-retry").is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(broker.messages("orders-topic-retry").len(), 1);
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.stats().published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_waits_when_saturated() {
        let broker = MemoryBroker::new();
        let scheduler = scheduler(&broker, 1);

        scheduler
            .schedule(retry_message("k1"), Duration::from_secs(10))
            .await
            .unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_secs(1),
            scheduler.schedule(retry_message("k2"), Duration::ZERO),
        )
        .await;
        assert!(blocked.is_err());

        // Waits for the first retry to fire and release its permit.
        scheduler
            .schedule(retry_message("k2"), Duration::ZERO)
            .await
            .unwrap();
        scheduler.drain().await;

        let keys: Vec<String> = broker
            .messages("orders-topic-retry")
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["k1", "k2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_fires_everything_then_closes() {
        let broker = MemoryBroker::new();
        let scheduler = scheduler(&broker, 10);

        for (key, secs) in [("k1", 6), ("k2", 2), ("k3", 4)] {
            scheduler
                .schedule(retry_message(key), Duration::from_secs(secs))
                .await
                .unwrap();
        }
        scheduler.drain().await;

        let keys: Vec<String> = broker
            .messages("orders-topic-retry")
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["k2", "k3", "k1"]);

        let stats = scheduler.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.scheduled, 3);
        assert_eq!(stats.published, 3);

        assert!(matches!(
            scheduler.schedule(retry_message("k4"), Duration::ZERO).await,
            Err(Error::SchedulerClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_waiting_retries() {
        let broker = MemoryBroker::new();
        let scheduler = scheduler(&broker, 10);

        scheduler
            .schedule(retry_message("k1"), Duration::from_secs(30))
            .await
            .unwrap();
        scheduler.shutdown().await;

        assert!(broker.messages("orders-topic-retry").is_empty());
        let stats = scheduler.stats();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.published, 0);
        assert!(scheduler.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_publish_is_retried_locally() {
        let broker = MemoryBroker::new();
        let scheduler = scheduler(&broker, 10);
        broker.fail_next_sends(2);

        scheduler
            .schedule(retry_message("k1"), Duration::from_secs(1))
            .await
            .unwrap();
        scheduler.drain().await;

        assert_eq!(broker.messages("orders-topic-retry").len(), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.republish_failures, 2);
        assert_eq!(stats.published, 1);
        assert_eq!(stats.lost, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_is_lost_after_all_publish_attempts_fail() {
        let broker = MemoryBroker::new();
        let scheduler = scheduler(&broker, 10);
        broker.fail_next_sends(3);

        scheduler
            .schedule(retry_message("k1"), Duration::from_secs(1))
            .await
            .unwrap();
        scheduler.drain().await;

        assert!(broker.messages("orders-topic-retry").is_empty());
        let stats = scheduler.stats();
        assert_eq!(stats.republish_failures, 3);
        assert_eq!(stats.lost, 1);
    }

    #[test]
    fn test_republish_delay_doubles_and_caps() {
        assert_eq!(POLICY.delay(1), Duration::from_millis(100));
        assert_eq!(POLICY.delay(3), Duration::from_millis(400));
        assert_eq!(POLICY.delay(8), Duration::from_secs(2));
    }
}
