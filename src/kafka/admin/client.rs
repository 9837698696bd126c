use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;
use tracing::debug;

use super::{wire, ClusterAdmin, EntityOutcome, PartitionOutcome, TopicSpec};
use crate::config::{parse_brokers, BrokerConfig};
use crate::kafka::{KafkaError, Result};

/// [`ClusterAdmin`] over a librdkafka admin client
///
/// Offset deletion is not exposed by the client, so it goes through
/// [`wire::delete_group_offsets`] against the bootstrap brokers.
pub struct RdKafkaAdmin {
    client: AdminClient<DefaultClientContext>,
    brokers: Vec<String>,
}

impl RdKafkaAdmin {
    pub fn connect(brokers: &str, config: &BrokerConfig) -> Result<Self> {
        let client = config
            .admin_client_config(brokers)?
            .create()
            .map_err(|e| KafkaError::client("create admin client", e))?;

        Ok(Self {
            client,
            brokers: parse_brokers(brokers)?,
        })
    }

    fn options(timeout: Duration) -> AdminOptions {
        AdminOptions::new()
            .operation_timeout(Some(timeout))
            .request_timeout(Some(timeout))
    }
}

fn outcome(result: std::result::Result<String, (String, RDKafkaErrorCode)>) -> EntityOutcome {
    match result {
        Ok(name) => EntityOutcome::ok(name),
        Err((name, code)) => EntityOutcome::failed(name, code.to_string()),
    }
}

#[async_trait]
impl ClusterAdmin for RdKafkaAdmin {
    async fn create_topics(&self, topics: Vec<TopicSpec>, timeout: Duration) -> Result<Vec<EntityOutcome>> {
        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|t| {
                NewTopic::new(
                    &t.name,
                    t.partitions,
                    TopicReplication::Fixed(t.replication_factor),
                )
            })
            .collect();

        let results = self
            .client
            .create_topics(new_topics.iter(), &Self::options(timeout))
            .await
            .map_err(|e| KafkaError::client("create_topics", e))?;

        Ok(results.into_iter().map(outcome).collect())
    }

    async fn delete_groups(&self, groups: Vec<String>, timeout: Duration) -> Result<Vec<EntityOutcome>> {
        let names: Vec<&str> = groups.iter().map(String::as_str).collect();
        let results = self
            .client
            .delete_groups(&names, &Self::options(timeout))
            .await
            .map_err(|e| KafkaError::client("delete_groups", e))?;

        Ok(results.into_iter().map(outcome).collect())
    }

    async fn delete_offsets(
        &self,
        group: String,
        partitions: BTreeMap<String, BTreeSet<i32>>,
        timeout: Duration,
    ) -> Result<Vec<PartitionOutcome>> {
        debug!(group = %group, topics = partitions.len(), "Deleting group offsets");
        wire::delete_group_offsets(&self.brokers, &group, &partitions, timeout).await
    }
}
