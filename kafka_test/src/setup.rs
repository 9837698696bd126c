//! Test environment setup and teardown
//!
//! Provides TestContext for test isolation with cleanup of the topics and
//! groups a test created.

use std::sync::Arc;
use std::time::Duration;

use kafka_eos::{BrokerConfig, TopicAdmin};
use rdkafka::admin::{AdminClient, AdminOptions};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::common::{get_bootstrap_servers, TestResult};

/// Test context providing isolation and cleanup
///
/// Each test should create its own TestContext which:
/// - Generates unique topic/group names to prevent collisions
/// - Tracks created resources for cleanup
/// - Deletes them when `cleanup` is called
pub struct TestContext {
    /// Unique identifier for this test run
    pub test_id: String,
    /// Admin under test, also used for cleanup
    pub admin: Arc<TopicAdmin>,
    /// Topics created during this test
    topics_created: Arc<Mutex<Vec<String>>>,
    /// Consumer groups created during this test
    groups_created: Arc<Mutex<Vec<String>>>,
}

impl TestContext {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let admin = TopicAdmin::connect(&get_bootstrap_servers(), BrokerConfig::default)?
            .with_timeout(Duration::from_secs(10));

        Ok(Self {
            test_id: Uuid::new_v4().to_string()[..8].to_string(),
            admin: Arc::new(admin),
            topics_created: Arc::new(Mutex::new(Vec::new())),
            groups_created: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Generate a unique topic name for this test
    ///
    /// The name is tracked for cleanup.
    pub async fn unique_topic(&self, base: &str) -> String {
        let uuid_str = Uuid::new_v4().to_string();
        let name = format!("{}-{}-{}", base, self.test_id, &uuid_str[..8]);
        self.topics_created.lock().await.push(name.clone());
        name
    }

    /// Generate a unique consumer group ID for this test
    ///
    /// The group is tracked for cleanup.
    pub async fn unique_group(&self, base: &str) -> String {
        let uuid_str = Uuid::new_v4().to_string();
        let name = format!("{}-{}-{}", base, self.test_id, &uuid_str[..8]);
        self.groups_created.lock().await.push(name.clone());
        name
    }

    /// Create a fresh topic through the admin under test
    pub async fn create_topic(&self, base: &str, partitions: i32) -> Result<String, Box<dyn std::error::Error>> {
        let topic = self.unique_topic(base).await;
        self.admin.create_topic(&topic, partitions, 1).await?;
        Ok(topic)
    }

    /// Delete every tracked group and topic, ignoring individual failures
    pub async fn cleanup(&self) -> TestResult {
        let groups = self.groups_created.lock().await;
        for group in groups.iter() {
            let _ = self.admin.delete_consumer_groups(&[group.as_str()]).await;
        }

        let topics = self.topics_created.lock().await;
        if !topics.is_empty() {
            let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
                .set("bootstrap.servers", get_bootstrap_servers())
                .create()?;
            let names: Vec<&str> = topics.iter().map(String::as_str).collect();
            let _ = admin.delete_topics(&names, &AdminOptions::new()).await;
        }

        Ok(())
    }
}

/// Verify that the broker is ready to accept connections
pub async fn verify_server_ready() -> TestResult {
    use rdkafka::producer::{FutureProducer, Producer};

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", get_bootstrap_servers())
        .set("message.timeout.ms", "5000")
        .create()?;

    // Try to get metadata - this verifies the connection
    producer
        .client()
        .fetch_metadata(None, Duration::from_secs(5))?;

    Ok(())
}
