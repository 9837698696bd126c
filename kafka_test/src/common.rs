//! Common utilities shared across E2E test modules
//!
//! Broker address, raw rdkafka clients used to verify what the library did,
//! and the test result type.

use std::env;
use std::time::Duration;

use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};

/// Test result type alias for cleaner function signatures
pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Broker list from KAFKA_BOOTSTRAP_SERVERS or the local default
pub fn get_bootstrap_servers() -> String {
    env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string())
}

/// Create a group consumer that only sees committed transactional data
pub fn create_read_committed_consumer(
    group_id: &str,
) -> Result<StreamConsumer, Box<dyn std::error::Error>> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", get_bootstrap_servers())
        .set("group.id", group_id)
        .set("isolation.level", "read_committed")
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .create()?;

    Ok(consumer)
}

/// Create a BaseConsumer for offset inspection and manual commits
pub fn create_offset_client(group_id: &str) -> Result<BaseConsumer, Box<dyn std::error::Error>> {
    let consumer: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", get_bootstrap_servers())
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .create()?;

    Ok(consumer)
}

/// Count messages visible to a read-committed consumer until `timeout` passes quietly
pub async fn count_committed_messages(
    topic: &str,
    group_id: &str,
    timeout: Duration,
) -> Result<usize, Box<dyn std::error::Error>> {
    let consumer = create_read_committed_consumer(group_id)?;
    consumer.subscribe(&[topic])?;

    let mut stream = consumer.stream();
    let mut count = 0;
    while let Ok(Some(message)) = tokio::time::timeout(timeout, stream.next()).await {
        let message = message?;
        if message.topic() == topic {
            count += 1;
        }
    }

    Ok(count)
}

/// Commit `offset` for `topic/partition` on behalf of `group_id`
pub fn commit_offset(
    group_id: &str,
    topic: &str,
    partition: i32,
    offset: i64,
) -> TestResult {
    let consumer = create_offset_client(group_id)?;
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition_offset(topic, partition, Offset::Offset(offset))?;
    consumer.commit(&tpl, CommitMode::Sync)?;
    Ok(())
}

/// Committed offset of `topic/partition` for `group_id`, if any
pub fn committed_offset(
    group_id: &str,
    topic: &str,
    partition: i32,
) -> Result<Option<i64>, Box<dyn std::error::Error>> {
    let consumer = create_offset_client(group_id)?;
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(topic, partition);
    let committed = consumer.committed_offsets(tpl, TEST_TIMEOUT)?;

    Ok(committed
        .find_partition(topic, partition)
        .and_then(|elem| match elem.offset() {
            Offset::Offset(offset) => Some(offset),
            _ => None,
        }))
}

/// Quiet period after which a consumer is considered caught up
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default test timeout duration
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Extended timeout for consumer group joins
pub const GROUP_JOIN_TIMEOUT: Duration = Duration::from_secs(30);
