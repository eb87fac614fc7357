//! In-memory simulation used by `courier simulate`.

use courier::simulate::{run_simulation, DeadLetter, SimulationConfig};
use courier_kafka::RetryConfig;
use std::time::Duration;
use tokio_test::assert_ok;

fn config(orders: usize, failing_notifications: usize) -> SimulationConfig {
    SimulationConfig {
        orders,
        failing_notifications,
        retry: RetryConfig::default(),
        link_base: "localhost:8081".to_string(),
        timeout: Duration::from_secs(300),
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_absorbed() {
    let report = assert_ok!(run_simulation(config(3, 2)).await);

    assert!(report.completed);
    assert_eq!(report.orders_published, 3);
    assert_eq!(report.notifications, 3);
    assert_eq!(report.retry_topic_messages, 2);
    assert!(report.dead_letters.is_empty());
    assert_eq!(report.retry_stats.published, 2);
    assert_eq!(report.retry_stats.lost, 0);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_is_dead_lettered() {
    let report = assert_ok!(run_simulation(config(1, 4)).await);

    assert!(report.completed);
    assert_eq!(report.notifications, 0);
    assert_eq!(report.retry_topic_messages, 3);
    assert_eq!(
        report.dead_letters,
        vec![DeadLetter {
            key: "ORDER_CREATED_1".to_string(),
            retry_count: 4,
            error_message: "Failed to create notification for order 1: notification store unavailable"
                .to_string(),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_report_serializes_to_json() {
    let report = assert_ok!(run_simulation(config(1, 0)).await);
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["completed"], true);
    assert_eq!(json["notifications"], 1);
    assert_eq!(json["retry_stats"]["scheduled"], 0);
}
