//! Command-line interface for courier
//!
//! # Usage Examples
//!
//! ```bash
//! # Provision orders-topic, orders-topic-retry and orders-topic-dlq
//! courier create-topics --kafka-brokers localhost:9092 --replication-factor 3
//!
//! # Publish one ORDER_CREATED event
//! courier publish --order-id 42 --user-id user-7 --amount 99.5 --status PENDING
//!
//! # Consume orders-topic with retries until Ctrl-C
//! courier consume --group-id customer-service --max-retry-attempts 3
//!
//! # In-memory run printing a JSON report
//! courier simulate --orders 10 --failing-notifications 4 --retry-backoff-initial 100ms
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use courier::config::parse_duration;
use courier::simulate::{run_simulation, SimulationConfig};
use courier::{
    publish_order_created, ConsumerArgs, ConsumerService, KafkaArgs, LogNotificationSink,
    NotificationConsumer, OrderCreated, RetryArgs, TopicArgs,
};
use courier_kafka::{KafkaTopicAdmin, MessagePublisher, Producer, RetryableConsumer, TopicAdmin};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Publish order events and consume them with retries and dead-lettering")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume orders-topic and raise a notification per order
    Consume {
        #[command(flatten)]
        kafka: KafkaArgs,

        #[command(flatten)]
        consumer: ConsumerArgs,

        #[command(flatten)]
        retry: RetryArgs,

        /// Prefix of the order link in notifications
        #[arg(long, env = "NOTIFICATION_LINK_BASE", default_value = "localhost:8081")]
        link_base: String,
    },

    /// Publish an ORDER_CREATED event
    Publish {
        #[command(flatten)]
        kafka: KafkaArgs,

        #[command(flatten)]
        order: OrderArgs,
    },

    /// Create a business topic and its retry and DLQ topics
    CreateTopics {
        #[command(flatten)]
        kafka: KafkaArgs,

        #[command(flatten)]
        topic: TopicArgs,

        #[command(flatten)]
        retry: RetryArgs,
    },

    /// Run the notification pipeline against an in-memory broker
    Simulate {
        /// Number of orders to publish
        #[arg(long, default_value = "5")]
        orders: usize,

        /// Notifications rejected before the sink recovers
        #[arg(long, default_value = "2")]
        failing_notifications: usize,

        /// Give up after this long
        #[arg(long, default_value = "2m", value_parser = parse_duration)]
        timeout: Duration,

        #[command(flatten)]
        retry: RetryArgs,
    },
}

#[derive(Args, Clone, Debug)]
struct OrderArgs {
    #[arg(long)]
    order_id: String,

    #[arg(long)]
    user_id: String,

    #[arg(long)]
    amount: f64,

    #[arg(long, default_value = "PENDING")]
    status: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Consume {
            kafka,
            consumer,
            retry,
            link_base,
        } => {
            let retryable = RetryableConsumer::from_config(
                &consumer.consumer_config(&kafka),
                &kafka.producer_config(),
                retry.retry_config(),
            )
            .context("Failed to create Kafka consumer")?;

            let service = ConsumerService::new(retryable).with_consumer(NotificationConsumer::new(
                Arc::new(LogNotificationSink),
                link_base,
            ));

            let stats = service.run(shutdown_on_ctrl_c()).await?;
            tracing::info!(
                "Retries: {} scheduled, {} published, {} lost, {} cancelled",
                stats.scheduled,
                stats.published,
                stats.lost,
                stats.cancelled
            );
        }
        Commands::Publish { kafka, order } => {
            let producer = Producer::new(&kafka.producer_config())
                .context("Failed to create Kafka producer")?;
            let order = OrderCreated {
                order_id: order.order_id,
                user_id: order.user_id,
                amount: order.amount,
                status: order.status,
            };

            let published = publish_order_created(&producer, &order).await;
            producer
                .close()
                .await
                .context("Failed to flush Kafka producer")?;
            published?;
        }
        Commands::CreateTopics {
            kafka,
            topic,
            retry,
        } => {
            let retry = retry.retry_config();
            retry.validate()?;
            let topics = topic.topics(&retry);

            let admin = KafkaTopicAdmin::new(&kafka.kafka_brokers, &kafka.kafka_security_protocol)?;
            admin
                .ensure_topics(&topics)
                .await
                .context("Failed to create topics")?;
            let names: Vec<&str> = topics.iter().map(|t| t.name.as_str()).collect();
            tracing::info!("Ensured topics: {}", names.join(", "));
        }
        Commands::Simulate {
            orders,
            failing_notifications,
            timeout,
            retry,
        } => {
            let report = run_simulation(SimulationConfig {
                orders,
                failing_notifications,
                retry: retry.retry_config(),
                link_base: "localhost:8081".to_string(),
                timeout,
            })
            .await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.completed {
                anyhow::bail!("Simulation did not settle within {timeout:?}");
            }
        }
    }

    Ok(())
}

/// Token cancelled on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
            cancel.cancel();
        }
    });
    token
}
