// Administrative helpers: topic creation, group offset reset, group deletion
//
// Every operation is one batched request. Batches are not transactional on
// the broker side: when one entity in a batch fails, the others may already
// have been applied, and nothing here rolls them back. Callers that need an
// all-or-nothing view must inspect the cluster after a failure.

mod client;
pub mod wire;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

pub use client::RdKafkaAdmin;

use crate::config::BrokerConfig;
use crate::kafka::constants::{error_name, DEFAULT_ADMIN_TIMEOUT, ERROR_NONE};
use crate::kafka::log_sink::{default_sink, LogEvent, LogSink};
use crate::kafka::{KafkaError, Result};

/// Longest topic name the broker accepts
const MAX_TOPIC_NAME_LEN: usize = 249;

/// A topic to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

/// Result of one named entity (topic or group) in a batched request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityOutcome {
    pub name: String,
    pub error: Option<String>,
}

impl EntityOutcome {
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: Some(error.into()),
        }
    }
}

/// Result of one partition in an OffsetDelete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOutcome {
    pub topic: String,
    pub partition: i32,
    pub error_code: i16,
}

/// The (topic, partition) pairs of one group whose offsets are deleted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupOffsetSelector {
    pub group: String,
    pub partitions: BTreeMap<String, BTreeSet<i32>>,
}

impl GroupOffsetSelector {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            partitions: BTreeMap::new(),
        }
    }

    /// Add partitions of `topic` to the selection
    pub fn partitions(mut self, topic: impl Into<String>, partitions: impl IntoIterator<Item = i32>) -> Self {
        self.partitions
            .entry(topic.into())
            .or_default()
            .extend(partitions);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(BTreeSet::is_empty)
    }
}

/// Cluster operations backing [`TopicAdmin`]
///
/// Implementations send one request per call and report per-entity
/// results; only transport failures and whole-request error codes are
/// returned as `Err`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    async fn create_topics(&self, topics: Vec<TopicSpec>, timeout: Duration) -> Result<Vec<EntityOutcome>>;

    async fn delete_groups(&self, groups: Vec<String>, timeout: Duration) -> Result<Vec<EntityOutcome>>;

    /// Refresh the group coordinator and delete the committed offsets
    async fn delete_offsets(
        &self,
        group: String,
        partitions: BTreeMap<String, BTreeSet<i32>>,
        timeout: Duration,
    ) -> Result<Vec<PartitionOutcome>>;
}

/// Stateless admin operations against a cluster
pub struct TopicAdmin {
    backend: Arc<dyn ClusterAdmin>,
    timeout: Duration,
    log: Arc<dyn LogSink>,
}

impl TopicAdmin {
    /// Build an admin over a fresh librdkafka admin client
    pub fn connect<F>(brokers: &str, conf: F) -> Result<Self>
    where
        F: FnOnce() -> BrokerConfig,
    {
        let config = conf();
        config.validate()?;
        let backend = RdKafkaAdmin::connect(brokers, &config)?;
        Ok(Self::with_backend(Arc::new(backend)))
    }

    pub fn with_backend(backend: Arc<dyn ClusterAdmin>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_ADMIN_TIMEOUT,
            log: default_sink(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    /// Create one topic
    ///
    /// A topic that already exists is reported as an error.
    pub async fn create_topic(&self, name: &str, partitions: i32, replication_factor: i32) -> Result<()> {
        validate_topic_name(name)?;
        if partitions < 1 {
            return Err(KafkaError::InvalidArgument(format!(
                "partition count must be positive, got {}",
                partitions
            )));
        }
        if replication_factor < 1 {
            return Err(KafkaError::InvalidArgument(format!(
                "replication factor must be positive, got {}",
                replication_factor
            )));
        }

        let spec = TopicSpec {
            name: name.to_string(),
            partitions,
            replication_factor,
        };
        let outcomes = self
            .backend
            .create_topics(vec![spec], self.timeout)
            .await
            .inspect_err(|e| self.report("create_topic", e))?;

        if let Some(message) = outcomes
            .into_iter()
            .filter(|o| o.name == name)
            .find_map(|o| o.error)
        {
            let err = KafkaError::Topic {
                topic: name.to_string(),
                message,
            };
            self.report("create_topic", &err);
            return Err(err);
        }

        info!(topic = %name, partitions, replication_factor, "Created topic");
        Ok(())
    }

    /// Delete the committed offsets of exactly the selected partitions
    ///
    /// The first failing partition, in (topic, partition) order, is
    /// returned. Partitions the broker already processed stay deleted.
    pub async fn reset_group_offsets(&self, selector: &GroupOffsetSelector) -> Result<()> {
        if selector.group.is_empty() {
            return Err(KafkaError::InvalidArgument(
                "group name must not be empty".to_string(),
            ));
        }
        if selector.is_empty() {
            return Ok(());
        }

        let outcomes = self
            .backend
            .delete_offsets(selector.group.clone(), selector.partitions.clone(), self.timeout)
            .await
            .inspect_err(|e| self.report("reset_group_offsets", e))?;

        let mut failed: Vec<&PartitionOutcome> = outcomes
            .iter()
            .filter(|o| o.error_code != ERROR_NONE)
            .collect();
        failed.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));

        if let Some(first) = failed.first() {
            let err = KafkaError::Partition {
                topic: first.topic.clone(),
                partition: first.partition,
                code: first.error_code,
                message: error_name(first.error_code).to_string(),
            };
            self.log.log(
                LogEvent::error("reset_group_offsets", "offset reset partially applied")
                    .with_error(&err)
                    .field("group", &selector.group)
                    .field("failed", failed.len())
                    .field("requested", outcomes.len()),
            );
            return Err(err);
        }

        info!(group = %selector.group, partitions = outcomes.len(), "Deleted group offsets");
        Ok(())
    }

    /// Delete consumer groups in one batch
    ///
    /// The first failing group, in input order, is returned; other groups
    /// of the batch may already be gone.
    pub async fn delete_consumer_groups(&self, groups: &[&str]) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }
        if groups.iter().any(|g| g.is_empty()) {
            return Err(KafkaError::InvalidArgument(
                "group name must not be empty".to_string(),
            ));
        }

        let outcomes = self
            .backend
            .delete_groups(groups.iter().map(|g| g.to_string()).collect(), self.timeout)
            .await
            .inspect_err(|e| self.report("delete_consumer_groups", e))?;

        for group in groups {
            let failure = outcomes
                .iter()
                .filter(|o| o.name == *group)
                .find_map(|o| o.error.clone());
            if let Some(message) = failure {
                let err = KafkaError::Group {
                    group: group.to_string(),
                    message,
                };
                self.report("delete_consumer_groups", &err);
                return Err(err);
            }
        }

        info!(groups = ?groups, "Deleted consumer groups");
        Ok(())
    }

    fn report(&self, operation: &'static str, err: &KafkaError) {
        self.log
            .log(LogEvent::error(operation, "admin request failed").with_error(err));
    }
}

impl std::fmt::Debug for TopicAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicAdmin")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Names the broker accepts: `[a-zA-Z0-9._-]`, at most 249 chars, not `.` or `..`
fn validate_topic_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(KafkaError::InvalidArgument(format!(
            "invalid topic name '{}': {}",
            name, reason
        )))
    };

    if name.is_empty() {
        return invalid("empty");
    }
    if name == "." || name == ".." {
        return invalid("reserved");
    }
    if name.len() > MAX_TOPIC_NAME_LEN {
        return invalid("too long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return invalid("illegal character");
    }
    Ok(())
}
